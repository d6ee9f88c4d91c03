//! Strongly-typed identifiers.
//!
//! All IDs are validated at construction time and implement common traits.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to define a strongly-typed ID newtype wrapper.
///
/// Generates: struct, `from_string()`, `must()`, `as_str()`, Display, Serialize, Deserialize.
/// Optionally generates `new()` (UUID v4) and `Default` if `uuid` flag is passed.
macro_rules! define_id {
    ($name:ident, uuid) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn from_string(s: String) -> Result<Self, &'static str> {
                if s.is_empty() {
                    return Err(concat!(stringify!($name), " cannot be empty"));
                }
                Ok(Self(s))
            }

            /// Construct from a string known by the caller to be non-empty.
            ///
            /// Panics on an empty string; only use at trusted call sites (tests,
            /// literals), never on externally-supplied input.
            pub fn must(s: impl Into<String>) -> Self {
                Self::from_string(s.into()).expect("id must be non-empty")
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn from_string(s: String) -> Result<Self, &'static str> {
                if s.is_empty() {
                    return Err(concat!(stringify!($name), " cannot be empty"));
                }
                Ok(Self(s))
            }

            pub fn must(s: impl Into<String>) -> Self {
                Self::from_string(s.into()).expect("id must be non-empty")
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(ProcessId, uuid);
define_id!(EnvelopeId, uuid);
define_id!(RequestId, uuid);
define_id!(SessionId, uuid);
define_id!(CheckpointId, uuid);
define_id!(InterruptId, uuid);
define_id!(UserId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_ids_are_unique_and_non_empty() {
        let a = EnvelopeId::new();
        let b = EnvelopeId::new();
        assert_ne!(a, b);
        assert!(!a.as_str().is_empty());
    }

    #[test]
    fn from_string_rejects_empty() {
        assert!(UserId::from_string(String::new()).is_err());
        assert!(UserId::from_string("u1".to_string()).is_ok());
    }

    #[test]
    fn must_builds_from_literal() {
        let u = UserId::must("alice");
        assert_eq!(u.as_str(), "alice");
    }

    #[test]
    fn display_matches_as_str() {
        let id = RequestId::new();
        assert_eq!(id.to_string(), id.as_str());
    }
}
