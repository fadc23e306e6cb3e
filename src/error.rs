//! Error types for plotwise
//!
//! Toyota Way: Clear error messages with actionable guidance (Respect for People)

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Plotwise error types
///
/// Every failure maps to exactly one kind and carries enough context
/// (trial id, measurement type, field name) for the caller to present an
/// actionable message.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or missing design parameters (e.g. split-plot without a second factor)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Structural mutation attempted against a trial with dependent data
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Unknown trial, treatment, plot or measurement id
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of entity that was looked up
        entity: &'static str,
        /// Identifier that failed to resolve
        id: String,
    },

    /// Non-finite, out-of-range or malformed input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Statistical inference is mathematically impossible with the data at hand
    #[error("Insufficient data to analyze {measurement_type} for trial {trial_id}: {reason}")]
    InsufficientData {
        /// Trial being analyzed
        trial_id: String,
        /// Measurement type being analyzed
        measurement_type: String,
        /// What is missing
        reason: String,
    },

    /// A trial lock was poisoned by a panicking writer
    #[error("Trial {0} lock poisoned by a panicked writer; reload the trial from its last export")]
    LockPoisoned(String),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a [`Error::NotFound`] with a displayable id.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}
