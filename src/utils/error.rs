//! Error types and handling
//!
//! Process-level error type. Per-cycle failures never reach this type; they
//! are folded into a `CycleResult` by the orchestrator.

use crate::config::ConfigError;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Delivery client error: {0}")]
    Delivery(String),
}

impl AppError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Config(_) => 1,
            _ => 2,
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_exit_with_one() {
        let err = AppError::from(ConfigError::MissingCredential("DISCORD_BOT_TOKEN".into()));
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("DISCORD_BOT_TOKEN"));
    }

    #[test]
    fn test_other_errors_exit_non_zero() {
        let err = AppError::Delivery("tls backend unavailable".into());
        assert_ne!(err.exit_code(), 0);
    }
}
