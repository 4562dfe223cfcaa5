use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }
    };
}

uuid_id!(
    /// Identifier of an `ingestion_runs` row.
    RunId
);

uuid_id!(
    /// Identifier of an `ingestion_retries` row.
    RetryId
);

/// Fresh identifier for a domain row whose caller did not supply one.
pub(crate) fn generated_row_id() -> String {
    Uuid::now_v7().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_parse_their_display_form() {
        let run = RunId::new();
        let parsed: RunId = run.to_string().parse().expect("parse run id");
        assert_eq!(parsed, run);

        let padded = format!("  {}\n", RetryId::new());
        assert!(padded.parse::<RetryId>().is_ok());
        assert!("not-a-uuid".parse::<RetryId>().is_err());
    }

    #[test]
    fn generated_ids_are_unique_uuids() {
        let first = generated_row_id();
        let second = generated_row_id();
        assert_ne!(first, second);
        assert!(Uuid::parse_str(&first).is_ok());
    }
}
