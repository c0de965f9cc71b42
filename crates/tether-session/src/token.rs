//! Single-use session tokens.

use std::fmt;

use rand::Rng;

use crate::SessionError;

/// Random bytes per token (256 bits).
const TOKEN_BYTES: usize = 32;

/// Length of the hex rendering.
pub const TOKEN_HEX_LEN: usize = TOKEN_BYTES * 2;

/// An opaque bearer token exchanged once for a live connection.
///
/// Always 64 lowercase hex characters. The only ways to get one are
/// [`generate`](Self::generate) (fresh randomness) and
/// [`parse`](Self::parse) (validated client input), so a `SessionToken`
/// in hand is at least well-formed.
///
/// `Debug` is redacted: tokens are bearer credentials and must not end up
/// in logs.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    /// Generates a fresh token from the thread-local CSPRNG.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let bytes: [u8; TOKEN_BYTES] = rng.random();
        Self(bytes.iter().map(|b| format!("{b:02x}")).collect())
    }

    /// Validates client input.
    ///
    /// # Errors
    /// [`SessionError::InvalidToken`] for anything that isn't exactly
    /// 64 lowercase hex characters.
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        let well_formed = raw.len() == TOKEN_HEX_LEN
            && raw
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !well_formed {
            return Err(SessionError::InvalidToken);
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}
