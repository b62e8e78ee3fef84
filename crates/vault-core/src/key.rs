//! VaultKey: the public identity of a vault and of each of its feeds.
//!
//! Wraps 32 random bytes and displays as a 64-character lowercase hex
//! string.

use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

const KEY_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VaultKeyError {
    #[error("Invalid vault key: expected {expected} hex chars, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("Invalid vault key: non-hex character at position {0}")]
    InvalidHex(usize),
}

/// A vault or feed identity.
///
/// # Examples
/// ```
/// use vault_core::VaultKey;
///
/// let key = VaultKey::generate();
/// let parsed: VaultKey = key.to_string().parse().unwrap();
/// assert_eq!(key, parsed);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VaultKey([u8; KEY_LEN]);

impl VaultKey {
    /// Generate a new random key.
    pub fn generate() -> Self {
        use rand::Rng;
        let mut bytes = [0u8; KEY_LEN];
        rand::rng().fill(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// First 8 hex chars, for log lines.
    pub fn short(&self) -> String {
        self.to_string()[..8].to_string()
    }
}

impl Display for VaultKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl Debug for VaultKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "VaultKey({})", self.short())
    }
}

impl FromStr for VaultKey {
    type Err = VaultKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != KEY_LEN * 2 {
            return Err(VaultKeyError::InvalidLength {
                expected: KEY_LEN * 2,
                actual: s.len(),
            });
        }

        let mut bytes = [0u8; KEY_LEN];
        let digits = s.as_bytes();
        for (i, byte) in bytes.iter_mut().enumerate() {
            let hi = hex_value(digits[i * 2]).ok_or(VaultKeyError::InvalidHex(i * 2))?;
            let lo = hex_value(digits[i * 2 + 1]).ok_or(VaultKeyError::InvalidHex(i * 2 + 1))?;
            *byte = (hi << 4) | lo;
        }
        Ok(Self(bytes))
    }
}

impl From<[u8; KEY_LEN]> for VaultKey {
    fn from(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }
}

// Serialize as hex string for consistency in logs, errors, JSON
impl serde::Serialize for VaultKey {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for VaultKey {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}
