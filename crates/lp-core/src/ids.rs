//! The shared identifier that joins a key photo to its key video.
//!
//! The identifier is opaque to the rest of the system, but it doubles as the
//! file stem of every paired component, so values that could escape the
//! destination directory are rejected at construction time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Opaque string uniquely pairing one still image and one motion clip.
///
/// A successfully produced key photo and key video carry the identical value
/// in their metadata, and both are named after it on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SharedIdentifier(String);

impl SharedIdentifier {
    /// Generate a fresh identifier: an upper-case hyphenated UUID v4.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string().to_uppercase())
    }

    /// Validate `value` and wrap it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIdentifier`] for empty strings, `.`/`..`, and
    /// values containing `/`, `\` or NUL.
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(Error::invalid_identifier(value, "empty"));
        }
        if value == "." || value == ".." {
            return Err(Error::invalid_identifier(value, "reserved path component"));
        }
        if value.contains(['/', '\\', '\0']) {
            return Err(Error::invalid_identifier(
                value,
                "contains a path separator or NUL",
            ));
        }
        Ok(Self(value))
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the identifier and return the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Default for SharedIdentifier {
    fn default() -> Self {
        Self::generate()
    }
}

impl fmt::Display for SharedIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SharedIdentifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SharedIdentifier {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<SharedIdentifier> for String {
    fn from(id: SharedIdentifier) -> Self {
        id.0
    }
}

impl AsRef<str> for SharedIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_identifiers_are_uppercase_uuids() {
        let id = SharedIdentifier::generate();
        assert_eq!(id.as_str().len(), 36);
        assert_eq!(id.as_str(), id.as_str().to_uppercase());
        assert!(Uuid::parse_str(id.as_str()).is_ok());
    }

    #[test]
    fn generated_identifiers_are_unique() {
        assert_ne!(SharedIdentifier::generate(), SharedIdentifier::generate());
    }

    #[test]
    fn parse_accepts_plain_strings() {
        let id: SharedIdentifier = "abc123".parse().unwrap();
        assert_eq!(id.as_str(), "abc123");
        assert_eq!(id.to_string(), "abc123");
    }

    #[test]
    fn parse_rejects_path_like_values() {
        for bad in ["", ".", "..", "a/b", "..\\x", "nul\0byte"] {
            assert!(SharedIdentifier::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn serde_roundtrip_validates() {
        let id = SharedIdentifier::parse("abc123").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"abc123\"");

        let back: SharedIdentifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);

        assert!(serde_json::from_str::<SharedIdentifier>("\"../etc\"").is_err());
    }
}
