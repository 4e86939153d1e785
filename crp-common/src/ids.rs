//! Identifier newtypes
//!
//! Every identifier is a UUIDv4 stored as hyphenated TEXT in SQLite.
//! Distinct types keep a program id from ever being bound where a client id
//! is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new random identifier
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Underlying UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// True for the all-zero UUID, which is never a valid identity
            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = crate::Error;

            fn from_str(s: &str) -> crate::Result<Self> {
                Uuid::parse_str(s).map(Self).map_err(|e| {
                    crate::Error::InvalidInput(format!(
                        "Invalid {} '{}': {}",
                        stringify!($name),
                        s,
                        e
                    ))
                })
            }
        }
    };
}

uuid_newtype!(
    /// Program identity
    ProgramId
);
uuid_newtype!(
    /// Client record identity
    ClientId
);
uuid_newtype!(
    /// Staff user identity, supplied by the session layer
    UserId
);
uuid_newtype!(
    /// Enrolment identity
    EnrolmentId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_parse_roundtrip() {
        let id = ClientId::generate();
        let parsed: ClientId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = "not-a-uuid".parse::<ProgramId>().unwrap_err();
        assert!(err.to_string().contains("ProgramId"));
    }

    #[test]
    fn test_nil_detection() {
        assert!(UserId::from_uuid(Uuid::nil()).is_nil());
        assert!(!UserId::generate().is_nil());
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id = ProgramId::generate();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }
}
