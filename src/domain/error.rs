//! Domain error types.

use crate::domain::execution::ExecutionError;

/// Top-level error type for fundcarry.
#[derive(Debug, thiserror::Error)]
pub enum CarryError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("market data error: {reason}")]
    Data { reason: String },

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("report error: {reason}")]
    Report { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CarryError {
    pub fn invalid(section: &str, key: &str, reason: impl Into<String>) -> Self {
        CarryError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn missing(section: &str, key: &str) -> Self {
        CarryError::ConfigMissing {
            section: section.to_string(),
            key: key.to_string(),
        }
    }

    pub fn data(reason: impl Into<String>) -> Self {
        CarryError::Data {
            reason: reason.into(),
        }
    }
}

impl From<&CarryError> for std::process::ExitCode {
    fn from(err: &CarryError) -> Self {
        let code: u8 = match err {
            CarryError::Io(_) => 1,
            CarryError::ConfigParse { .. }
            | CarryError::ConfigMissing { .. }
            | CarryError::ConfigInvalid { .. } => 2,
            CarryError::Data { .. } => 3,
            CarryError::Execution(_) => 4,
            CarryError::Report { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
