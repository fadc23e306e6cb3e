//! Typed identifiers for trial entities
//!
//! Cross-entity references (plot → treatment, measurement → plot) are ID
//! lookups into the owning collections, never embedded back-references.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Allocate a fresh random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID (e.g. one loaded from persistence).
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
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
                    crate::Error::Validation(format!(
                        "{} '{s}' is not a valid UUID: {e}",
                        stringify!($name)
                    ))
                })
            }
        }
    };
}

entity_id!(
    /// Identifier of a [`Trial`](super::Trial).
    TrialId
);
entity_id!(
    /// Identifier of a [`Treatment`](super::Treatment).
    TreatmentId
);
entity_id!(
    /// Identifier of a [`Plot`](super::Plot).
    PlotId
);
entity_id!(
    /// Identifier of a [`Measurement`](super::Measurement).
    MeasurementId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(PlotId::new(), PlotId::new());
    }

    #[test]
    fn test_id_display_parse() {
        let id = TrialId::new();
        let parsed: TrialId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_id_parse_rejects_garbage() {
        let err = "not-a-uuid".parse::<TreatmentId>().unwrap_err();
        assert!(err.to_string().contains("TreatmentId"));
    }

    #[test]
    fn test_id_serializes_as_plain_string() {
        let id = PlotId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }
}
