//! Framework Error Handling
//!
//! Единый error type для всех операций ядра. Ошибки пользовательских
//! callbacks (фабрики, слушатели) сюда НЕ попадают: они гасятся на границе
//! и превращаются в framework events (см. `listeners` и `service_entry`).

use common::comprehensive_errors::VelesCoreError;
use thiserror::Error;

/// Основной error type ядра фреймворка
#[derive(Debug, Error, Clone)]
pub enum FrameworkError {
    /// Операция на bundle context, чей бандл больше не активен
    #[error("The bundle context is no longer valid")]
    ContextInvalidated,

    /// Некорректный аргумент публичного API
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Карта интерфейсов содержит повторяющееся имя
    #[error("Duplicate interface name in registration: {interface}")]
    DuplicateInterface { interface: String },

    /// Ошибка разбора LDAP-фильтра
    #[error("Filter parse error at position {position}: {message}")]
    FilterParse { position: usize, message: String },

    /// Фабрика сервиса упала или вернула неполную карту интерфейсов
    #[error("Service factory failure for service.id={service_id}: {reason}")]
    FactoryFailure { service_id: u64, reason: String },

    /// Операция в недопустимом состоянии (например, повторный unregister)
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// Не удалось создать data-директорию бандла
    #[error("Data directory error: {message}")]
    DataDirectory { message: String },
}

pub type FrameworkResult<T> = Result<T, FrameworkError>;

impl FrameworkError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        FrameworkError::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        FrameworkError::InvalidState {
            message: message.into(),
        }
    }
}

/// Мост в workspace-иерархию: `common` не может зависеть от этого крейта,
/// поэтому конверсия в `VelesCoreError::Framework` живёт здесь.
impl From<FrameworkError> for VelesCoreError {
    fn from(err: FrameworkError) -> Self {
        VelesCoreError::Framework(Box::new(err))
    }
}
