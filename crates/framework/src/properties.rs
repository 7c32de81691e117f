//! Service Properties
//!
//! Карта атрибутов регистрации: string → `serde_json::Value`. Зарезервированные
//! ключи (`service.*`, `objectClass`) назначает фреймворк; политика их
//! сохранения при обновлении описана в `ServiceRegistry`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::constants::{
    OBJECT_CLASS, RESERVED_PREFIX, SCOPE_BUNDLE, SCOPE_PROTOTYPE, SCOPE_SINGLETON, SERVICE_ID,
    SERVICE_RANKING, SERVICE_SCOPE,
};

/// Область действия регистрации
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceScope {
    /// Один разделяемый экземпляр для всех потребителей
    Singleton,
    /// Один экземпляр на потребляющий бандл
    Bundle,
    /// Новый экземпляр на каждое приобретение
    Prototype,
}

impl ServiceScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceScope::Singleton => SCOPE_SINGLETON,
            ServiceScope::Bundle => SCOPE_BUNDLE,
            ServiceScope::Prototype => SCOPE_PROTOTYPE,
        }
    }

    pub fn parse(raw: &str) -> Option<ServiceScope> {
        match raw {
            SCOPE_SINGLETON => Some(ServiceScope::Singleton),
            SCOPE_BUNDLE => Some(ServiceScope::Bundle),
            SCOPE_PROTOTYPE => Some(ServiceScope::Prototype),
            _ => None,
        }
    }
}

impl fmt::Display for ServiceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Карта свойств сервиса
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Properties {
    map: BTreeMap<String, Value>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.map.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.map.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.map.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.map.iter()
    }

    /// `service.id`, назначенный фреймворком. 0 до регистрации.
    pub fn service_id(&self) -> u64 {
        self.map
            .get(SERVICE_ID)
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }

    /// `service.ranking`; нецелые значения трактуются как 0.
    pub fn ranking(&self) -> i64 {
        self.map
            .get(SERVICE_RANKING)
            .and_then(Value::as_i64)
            .unwrap_or(0)
    }

    pub fn scope(&self) -> ServiceScope {
        self.map
            .get(SERVICE_SCOPE)
            .and_then(Value::as_str)
            .and_then(ServiceScope::parse)
            .unwrap_or(ServiceScope::Singleton)
    }

    pub fn object_class(&self) -> Vec<String> {
        self.map
            .get(OBJECT_CLASS)
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Перенести все незарезервированные ключи из `other` в `self`.
    pub(crate) fn extend_non_reserved(&mut self, other: &Properties) {
        for (key, value) in other.iter() {
            if !is_reserved_key(key) {
                self.map.insert(key.clone(), value.clone());
            }
        }
    }
}

impl FromIterator<(String, Value)> for Properties {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            map: iter.into_iter().collect(),
        }
    }
}

/// Ключи, которые назначает и сохраняет фреймворк.
pub fn is_reserved_key(key: &str) -> bool {
    key == OBJECT_CLASS || key.starts_with(RESERVED_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_key_detection() {
        assert!(is_reserved_key("service.id"));
        assert!(is_reserved_key("service.custom"));
        assert!(is_reserved_key("objectClass"));
        assert!(!is_reserved_key("color"));
        assert!(!is_reserved_key("serviceable"));
    }

    #[test]
    fn test_ranking_defaults_to_zero_for_non_integer() {
        let props = Properties::new().with(SERVICE_RANKING, "high");
        assert_eq!(props.ranking(), 0);

        let props = Properties::new().with(SERVICE_RANKING, 5);
        assert_eq!(props.ranking(), 5);

        let props = Properties::new().with(SERVICE_RANKING, -3);
        assert_eq!(props.ranking(), -3);
    }

    #[test]
    fn test_scope_parsing() {
        let props = Properties::new().with(SERVICE_SCOPE, "prototype");
        assert_eq!(props.scope(), ServiceScope::Prototype);

        // unknown scope falls back to singleton
        let props = Properties::new().with(SERVICE_SCOPE, "global");
        assert_eq!(props.scope(), ServiceScope::Singleton);

        let props = Properties::new();
        assert_eq!(props.scope(), ServiceScope::Singleton);
    }

    #[test]
    fn test_extend_non_reserved_skips_framework_keys() {
        let mut base = Properties::new().with(SERVICE_ID, 3).with("color", "red");
        let update = Properties::new()
            .with(SERVICE_ID, 99)
            .with("objectClass", vec!["X"])
            .with("color", "blue")
            .with("size", "xl");

        base.extend_non_reserved(&update);
        assert_eq!(base.service_id(), 3);
        assert!(base.object_class().is_empty());
        assert_eq!(*base.get("color").unwrap(), "blue");
        assert_eq!(*base.get("size").unwrap(), "xl");
    }
}
