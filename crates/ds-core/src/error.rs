//! Error types for DiscoStat

use thiserror::Error;

/// DiscoStat error type
///
/// `Config` covers every "the inputs do not describe a runnable evaluation"
/// condition (missing store, object, key, or an unresolvable parameter type).
/// Fit-quality problems are never errors; they travel as status codes on
/// [`crate::FitOutcome`].
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration error (missing object, key or parameter type)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A value the caller relies on was not produced by a fit
    #[error("Contract violation: {0}")]
    Contract(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),
}

impl Error {
    /// True for errors that stem from the evaluation inputs rather than numerics.
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_) | Error::Io(_) | Error::Json(_))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
