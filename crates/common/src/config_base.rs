use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::comprehensive_errors::{ConfigError, ConfigResult};
use crate::structured_logging::LoggingConfig;

/// Базовая конфигурация файлового хранилища (data roots бандлов)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfigBase {
    /// Корневая директория, под которой создаются data-директории бандлов
    pub root: PathBuf,
    /// Создавать корень при старте фреймворка
    pub create_on_boot: bool,
}

impl Default for StorageConfigBase {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./veles-data"),
            create_on_boot: true,
        }
    }
}

impl StorageConfigBase {
    pub fn temp() -> Self {
        Self {
            root: std::env::temp_dir().join("veles-data"),
            create_on_boot: true,
        }
    }
}

/// Конфигурация загрузки фреймворка.
///
/// Профили в стиле production/testing: тесты получают temp-хранилище и
/// debug-логирование, production — JSON-логи и явный корень.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameworkConfig {
    /// Seed для framework properties (видимы read-only всем bundle contexts)
    pub properties: BTreeMap<String, serde_json::Value>,
    pub storage: StorageConfigBase,
    pub logging: LoggingConfig,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            properties: BTreeMap::new(),
            storage: StorageConfigBase::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl FrameworkConfig {
    pub fn production() -> Self {
        Self {
            properties: BTreeMap::new(),
            storage: StorageConfigBase::default(),
            logging: LoggingConfig::production(),
        }
    }

    pub fn testing() -> Self {
        Self {
            properties: BTreeMap::new(),
            storage: StorageConfigBase::temp(),
            logging: LoggingConfig::debug(),
        }
    }

    pub fn with_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.storage.root = root.into();
        self
    }

    /// Валидация конфигурации перед загрузкой
    pub fn validate(&self) -> ConfigResult<()> {
        if self.storage.root.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "storage.root".to_string(),
                reason: "empty path".to_string(),
            });
        }

        for key in self.properties.keys() {
            if key.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "properties".to_string(),
                    reason: "empty property key".to_string(),
                });
            }
        }

        Ok(())
    }
}
