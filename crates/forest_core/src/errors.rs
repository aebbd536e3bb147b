//! Error types for the forestgen core

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur anywhere between IR loading and native verification
#[derive(Error, Debug)]
pub enum ForestError {
    /// Structural or schema violation in an IR document
    #[error("Malformed IR at {path}: {reason}")]
    MalformedIr { path: String, reason: String },

    /// A node the code generator cannot lower
    #[error("Unsupported IR construct at {path}: {reason}")]
    UnsupportedConstruct { path: String, reason: String },

    /// Imported model uses a feature outside regression tree ensembles
    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),

    /// Artifact or entry-point symbol could not be loaded
    #[error("Failed to load `{symbol}` from {}: {reason}", path.display())]
    NativeLoad {
        path: PathBuf,
        symbol: String,
        reason: String,
    },

    /// Native invocation was rejected or produced an impossible result
    #[error("Native call to `{symbol}` failed: {reason}")]
    NativeCall { symbol: String, reason: String },

    /// Fixture feature rows and predictions differ in length
    #[error("Fixture mismatch: {features} feature vectors but {predictions} predictions")]
    FixtureMismatch { features: usize, predictions: usize },

    /// Fixture holds no pairs, so nothing could be verified
    #[error("Fixture is empty")]
    EmptyFixture,

    /// Feature vector width differs from what the consumer expects
    #[error("Feature vector {row} has {found} values, expected {expected}")]
    FeatureWidth {
        row: usize,
        expected: usize,
        found: usize,
    },

    /// One or more predictions exceeded the allowed deviation
    #[error(
        "{failed} of {checked} predictions exceeded tolerance (worst at fixture row {worst_row}: \
         expected {expected}, got {actual})"
    )]
    ToleranceViolation {
        failed: usize,
        checked: usize,
        worst_row: usize,
        expected: f64,
        actual: f64,
    },

    /// External C compiler or linker failed
    #[error("Toolchain error: {0}")]
    Toolchain(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML configuration error
    #[error("Config parse error: {0}")]
    Config(#[from] toml::de::Error),
}

impl ForestError {
    pub(crate) fn malformed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedIr {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unsupported(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsupportedConstruct {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for forestgen operations
pub type Result<T> = std::result::Result<T, ForestError>;
