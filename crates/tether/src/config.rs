//! Server configuration, loaded from the environment.
//!
//! | Variable | Field | Default |
//! |---|---|---|
//! | `TETHER_BIND` | `bind_addr` | `0.0.0.0:3333` |
//! | `TETHER_DATABASE` | `database_path` (`:memory:` for none) | `database.db` |
//! | `TETHER_TOKEN_TTL_SECS` | `session.token_ttl_secs` | `300` |
//! | `TETHER_BCRYPT_COST` | `session.bcrypt_cost` | `12` |
//! | `TETHER_DUPLICATE_POLICY` | `session.duplicate_policy` | `replace` |

use std::path::PathBuf;
use std::str::FromStr;

use tether_session::SessionConfig;

/// Value of `TETHER_DATABASE` that selects the in-memory store.
pub const IN_MEMORY: &str = ":memory:";

/// An environment variable held a value that doesn't parse.
#[derive(Debug, thiserror::Error)]
#[error("invalid {var}={value:?}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

/// Everything the `tether` binary needs to start.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// SQLite file holding users. `None` keeps users in memory.
    pub database_path: Option<PathBuf>,
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3333".to_string(),
            database_path: Some(PathBuf::from("database.db")),
            session: SessionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Reads the process environment. Unset variables keep their
    /// defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds a config from any variable source.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(addr) = lookup("TETHER_BIND") {
            config.bind_addr = addr;
        }
        if let Some(path) = lookup("TETHER_DATABASE") {
            config.database_path = if path == IN_MEMORY {
                None
            } else {
                Some(PathBuf::from(path))
            };
        }
        if let Some(ttl) = parsed(&lookup, "TETHER_TOKEN_TTL_SECS")? {
            config.session.token_ttl_secs = ttl;
        }
        if let Some(cost) = parsed(&lookup, "TETHER_BCRYPT_COST")? {
            config.session.bcrypt_cost = cost;
        }
        if let Some(policy) = parsed(&lookup, "TETHER_DUPLICATE_POLICY")? {
            config.session.duplicate_policy = policy;
        }

        Ok(config)
    }
}

fn parsed<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(var)
        .map(|value| {
            value.trim().parse().map_err(|e: T::Err| ConfigError {
                var,
                reason: e.to_string(),
                value,
            })
        })
        .transpose()
}
