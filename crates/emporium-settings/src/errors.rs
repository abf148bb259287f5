//! Settings errors.

use std::path::PathBuf;

use thiserror::Error;

/// Why settings could not be resolved.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// The settings file is not valid JSON, or a field has the wrong type.
    #[error("malformed settings: {0}")]
    Json(#[from] serde_json::Error),
    /// A value parsed but breaks a cross-field rule.
    #[error("{field}: {reason}")]
    Invalid {
        /// Dotted camelCase path of the offending field.
        field: &'static str,
        /// What the value must satisfy.
        reason: &'static str,
    },
    /// An explicitly requested settings file does not exist.
    #[error("settings file {} not found", .0.display())]
    NotFound(PathBuf),
}

impl SettingsError {
    pub(crate) fn invalid(field: &'static str, reason: &'static str) -> Self {
        Self::Invalid { field, reason }
    }
}

/// Result alias for settings resolution.
pub type Result<T> = std::result::Result<T, SettingsError>;
