//! Identifiers for events and args objects.
//!
//! Both are opaque strings. Equality is the only meaningful operation; the
//! prefix just makes log lines easier to read.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Declares an opaque, prefixed identifier minted from a v4 UUID.
macro_rules! define_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Mints a fresh identifier.
            pub fn new() -> Self {
                Self(format!("{}-{}", $prefix, Uuid::new_v4()))
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
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

define_id!(EventId, "evt");
define_id!(ArgsId, "args");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_id_prefix() {
        let id = EventId::new();
        assert!(id.as_str().starts_with("evt-"));
    }

    #[test]
    fn test_args_id_prefix() {
        let id = ArgsId::new();
        assert!(id.as_str().starts_with("args-"));
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(EventId::new(), EventId::new());
        assert_ne!(ArgsId::new(), ArgsId::new());
    }

    #[test]
    fn test_id_serializes_transparently() {
        let id = EventId::from("evt-world-saved");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"evt-world-saved\"");
    }
}
