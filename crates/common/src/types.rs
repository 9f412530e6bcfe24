//! Identifier types for the chat protocol.
//!
//! Identifiers are opaque strings issued by the homeserver; the newtypes
//! only keep them from being mixed up at call sites.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the raw identifier.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Fully qualified user id, e.g. `@bot:example.org`.
    UserId
);

string_id!(
    /// Device id the access token is bound to.
    DeviceId
);

string_id!(
    /// Room id, e.g. `!abc:example.org`.
    RoomId
);

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_raw_value() {
        let user = UserId::new("@bot:example.org");
        assert_eq!(user.to_string(), "@bot:example.org");
        assert_eq!(user.as_str(), "@bot:example.org");
    }

    #[test]
    fn test_serde_is_transparent() {
        let room = RoomId::from("!room:example.org");
        let json = serde_json::to_string(&room).unwrap();
        assert_eq!(json, "\"!room:example.org\"");

        let back: RoomId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, room);
    }
}
