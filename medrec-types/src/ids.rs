//! Strongly-typed identifiers (NewType pattern over UUIDs).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generates a fresh random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }
    };
}

uuid_id! {
    /// Identifier of one stored record.
    RecordId
}

uuid_id! {
    /// Identifier of a family member — the logical owner of a record set.
    /// All of a member's records share one encryption key.
    MemberId
}

uuid_id! {
    /// Identifier of one migration run.
    MigrationId
}

uuid_id! {
    /// Identifier of a durable pre-migration checkpoint.
    CheckpointId
}

uuid_id! {
    /// Identifier of a device in the household.
    DeviceId
}
