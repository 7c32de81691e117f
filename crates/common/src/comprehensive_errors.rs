//! Comprehensive Error Handling System for VELES
//!
//! Этот модуль содержит иерархию ошибок верхнего уровня для всех крейтов
//! рабочего пространства. Каждый субдомен имеет собственный enum, верхний
//! уровень собирает их через `#[from]` conversions.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for VELES applications
#[derive(Debug, Error)]
pub enum VelesCoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Logging setup error: {0}")]
    Logging(#[from] crate::structured_logging::LoggingError),

    /// Ошибка ядра фреймворка. Вариант держит boxed source: стрелка
    /// зависимостей направлена из ядра сюда, поэтому конверсия
    /// `From<FrameworkError>` определена рядом с самим типом ошибки ядра.
    #[error("Framework error: {0}")]
    Framework(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Ошибки конфигурации рабочего пространства
#[derive(Debug, Error, Clone)]
pub enum ConfigError {
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },

    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },
}

/// Ошибки файлового хранилища (bundle data roots)
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to create storage directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage root is not a directory: {path}")]
    NotADirectory { path: PathBuf },
}

pub type VelesCoreResult<T> = Result<T, VelesCoreError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
pub type StorageResult<T> = Result<T, StorageError>;

impl From<serde_json::Error> for VelesCoreError {
    fn from(e: serde_json::Error) -> Self {
        VelesCoreError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidValue {
            field: "storage_root".to_string(),
            reason: "empty path".to_string(),
        };
        assert!(err.to_string().contains("storage_root"));
        assert!(err.to_string().contains("empty path"));
    }

    #[test]
    fn test_core_error_from_config() {
        let err: VelesCoreError = ConfigError::MissingField {
            field: "properties".to_string(),
        }
        .into();
        assert!(matches!(err, VelesCoreError::Config(_)));
    }
}
