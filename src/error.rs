//! Error handling for benchflow.
//!
//! Centralized error types using thiserror. The interpreter's failure policy
//! distinguishes configuration errors (always fatal) from action errors
//! (governed by the sequence's `fail_policy`), so every variant here carries
//! that classification via [`Error::is_fatal`].

use thiserror::Error;

/// Main error type for benchflow
#[derive(Error, Debug)]
pub enum Error {
    /// IO errors (file operations, result streams, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors (bench config, sequence structure, zero sweep
    /// step, unknown instrument or method). Always fatal.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed sequence document
    #[error("Sequence error: {0}")]
    Sequence(String),

    /// Instrument call failures
    #[error("Instrument error: {0}")]
    Instrument(String),

    /// Transform dispatch failures
    #[error("Transform error: {0}")]
    Transform(String),

    /// Calibration action failures
    #[error("Calibration error: {0}")]
    Calibration(String),

    /// Calibration store corruption or persistence failures. Always fatal.
    #[error("Calibration store error: {0}")]
    Store(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors from sequence documents. Always fatal.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The operator confirmed an interrupt with 'q'
    #[error("Operator requested shutdown")]
    OperatorQuit,
}

/// Result type alias for benchflow operations
pub type Result<T> = std::result::Result<T, Error>;

// Convenient error constructors
impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a sequence error
    pub fn sequence(msg: impl Into<String>) -> Self {
        Self::Sequence(msg.into())
    }

    /// Create an instrument error
    pub fn instrument(msg: impl Into<String>) -> Self {
        Self::Instrument(msg.into())
    }

    /// Create a transform error
    pub fn transform(msg: impl Into<String>) -> Self {
        Self::Transform(msg.into())
    }

    /// Create a calibration error
    pub fn calibration(msg: impl Into<String>) -> Self {
        Self::Calibration(msg.into())
    }

    /// Create a calibration store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Whether this error bypasses the sequence's fail policy.
    ///
    /// Configuration and store-corruption errors abort the run even under
    /// `fail_policy: continue`; action-level errors do not.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Sequence(_) | Self::Store(_) | Self::Yaml(_) | Self::OperatorQuit
        )
    }
}
