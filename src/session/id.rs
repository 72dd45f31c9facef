//! Session identifier type.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::error::ArbitriumError;
use crate::Result;

/// Global counter for session ID generation.
static COUNTER: AtomicU64 = AtomicU64::new(1);

/// Prefix of generated ids; caller-chosen names may not use it.
const GENERATED_PREFIX: &str = "sess-";

/// Longest accepted caller-chosen name.
const MAX_NAME_LEN: usize = 64;

/// Unique identifier for a shell session.
///
/// Generated IDs come from an atomic counter and are displayed as
/// `sess-XXXXXXXX` (hexadecimal); they are never reused within a process.
/// Callers may instead pick a name of ASCII letters, digits, `-`, `_` and
/// `.`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Create a new unique session ID.
    pub fn generate() -> Self {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("{GENERATED_PREFIX}{n:08x}"))
    }

    /// Accept a caller-chosen session name.
    pub fn named(name: &str) -> Result<Self> {
        validate_name(name).map_err(ArbitriumError::InvalidSessionId)?;
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate_name(name: &str) -> std::result::Result<(), String> {
    if name.is_empty() {
        return Err("session name must not be empty".into());
    }
    if name.len() > MAX_NAME_LEN {
        return Err(format!(
            "session name too long ({} chars, max {MAX_NAME_LEN})",
            name.len()
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(format!("session name contains invalid characters: {name}"));
    }
    if name.starts_with('.') {
        return Err(format!("session name must not start with '.': {name}"));
    }
    if name.starts_with(GENERATED_PREFIX) {
        return Err(format!(
            "session names starting with '{GENERATED_PREFIX}' are reserved: {name}"
        ));
    }
    Ok(())
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Lets maps keyed by `SessionId` be queried with a plain `&str`.
impl std::borrow::Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_uniqueness() {
        let mut ids = HashSet::new();
        for _ in 0..10_000 {
            let id = SessionId::generate();
            assert!(ids.insert(id.clone()), "Duplicate ID generated: {}", id);
        }
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_generated_format() {
        let id = SessionId::generate();
        let hex = id.as_str().strip_prefix("sess-").unwrap();
        assert_eq!(hex.len(), 8);
        assert!(u64::from_str_radix(hex, 16).is_ok());
    }

    #[test]
    fn test_named_valid() {
        for name in ["my-session", "test.1", "a", "under_score", "123"] {
            assert_eq!(SessionId::named(name).unwrap().as_str(), name);
        }
    }

    #[test]
    fn test_named_invalid() {
        let long = "a".repeat(65);
        for name in ["", long.as_str(), "has space", "slash/name", "..", "sess-00000001", "ünï"] {
            let err = SessionId::named(name).unwrap_err();
            assert!(
                matches!(err, ArbitriumError::InvalidSessionId(_)),
                "accepted {name:?}"
            );
        }
    }

    #[test]
    fn test_serializes_as_string() {
        let id = SessionId::named("build").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"build\"");
    }
}
