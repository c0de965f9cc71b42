//! Session-layer configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// ---------------------------------------------------------------------------
// DuplicatePolicy
// ---------------------------------------------------------------------------

/// What the registry does when a user who already has a live connection
/// completes a second handoff.
///
/// ```text
///   ReplaceExisting:  old ──close(Replaced)──→ gone,  new ──→ registered
///   RejectNew:        old stays,               new ──close(AlreadyConnected)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Close the old connection and register the new one.
    #[default]
    ReplaceExisting,
    /// Keep the old connection and refuse the new one.
    RejectNew,
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuplicatePolicy::ReplaceExisting => f.write_str("replace"),
            DuplicatePolicy::RejectNew => f.write_str("reject"),
        }
    }
}

/// Returned when a policy name is neither `replace` nor `reject`.
#[derive(Debug, thiserror::Error)]
#[error("unknown duplicate policy {0:?} (expected \"replace\" or \"reject\")")]
pub struct ParsePolicyError(String);

impl FromStr for DuplicatePolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(DuplicatePolicy::ReplaceExisting),
            "reject" => Ok(DuplicatePolicy::RejectNew),
            other => Err(ParsePolicyError(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Configuration for credential checks, token lifetime and the registry.
///
/// Sensible defaults are provided; override just the fields you need:
///
/// ```rust
/// use tether_session::SessionConfig;
///
/// let config = SessionConfig {
///     token_ttl_secs: 60,
///     ..SessionConfig::default()
/// };
/// assert_eq!(config.token_ttl().as_secs(), 60);
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long (in seconds) an issued token may wait to be redeemed.
    ///
    /// Default: 300 seconds.
    pub token_ttl_secs: u64,

    /// bcrypt work factor for new password hashes. Existing hashes keep
    /// the cost they were created with.
    ///
    /// Default: `bcrypt::DEFAULT_COST`. Tests use the minimum (4).
    pub bcrypt_cost: u32,

    /// Registry behavior for a second connection of the same user.
    pub duplicate_policy: DuplicatePolicy,

    /// How often (in seconds) the server clears expired tokens.
    ///
    /// Default: 60 seconds.
    pub sweep_interval_secs: u64,
}

impl SessionConfig {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        // tokio::time::interval panics on a zero period.
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: 300,
            bcrypt_cost: bcrypt::DEFAULT_COST,
            duplicate_policy: DuplicatePolicy::default(),
            sweep_interval_secs: 60,
        }
    }
}
