//! Interface Map
//!
//! Неизменяемая таблица interface-name → type-erased указатель на сервис.
//! Одна публикация всегда несёт одну карту, описывающую полный набор
//! интерфейсов; потребитель, зная конкретное имя, восстанавливает
//! типизированный handle через downcast.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::errors::{FrameworkError, FrameworkResult};

/// Type-erased указатель на объект сервиса
pub type ServiceObj = Arc<dyn Any + Send + Sync>;

/// Неизменяемая карта interface-name → сервисный объект
#[derive(Clone)]
pub struct InterfaceMap {
    entries: BTreeMap<String, ServiceObj>,
}

impl InterfaceMap {
    /// Карта из одного интерфейса.
    pub fn single<T: Send + Sync + 'static>(interface: impl Into<String>, obj: Arc<T>) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(interface.into(), obj as ServiceObj);
        Self { entries }
    }

    /// Карта из списка пар. Повторяющееся имя интерфейса — ошибка
    /// `DuplicateInterface`.
    pub fn from_pairs(
        pairs: impl IntoIterator<Item = (String, ServiceObj)>,
    ) -> FrameworkResult<Self> {
        let mut entries = BTreeMap::new();
        for (name, obj) in pairs {
            if entries.insert(name.clone(), obj).is_some() {
                return Err(FrameworkError::DuplicateInterface { interface: name });
            }
        }
        Ok(Self { entries })
    }

    pub fn get(&self, interface: &str) -> Option<&ServiceObj> {
        self.entries.get(interface)
    }

    /// Типизированный доступ: downcast записи под именем `interface`.
    pub fn get_as<T: Send + Sync + 'static>(&self, interface: &str) -> Option<Arc<T>> {
        self.entries
            .get(interface)
            .and_then(|obj| obj.clone().downcast::<T>().ok())
    }

    pub fn contains(&self, interface: &str) -> bool {
        self.entries.contains_key(interface)
    }

    /// Упорядоченный список имён; ровно он попадает в `objectClass`.
    pub fn interfaces(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Совпадают ли записи двух карт пообъектно. Используется прототипным
    /// scope для опознания конкретного экземпляра при освобождении.
    pub(crate) fn same_instances(&self, other: &InterfaceMap) -> bool {
        self.entries.len() == other.entries.len()
            && self.entries.iter().zip(other.entries.iter()).all(
                |((name_a, obj_a), (name_b, obj_b))| {
                    name_a == name_b && Arc::ptr_eq(obj_a, obj_b)
                },
            )
    }
}

impl fmt::Debug for InterfaceMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfaceMap")
            .field("interfaces", &self.interfaces())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;
    struct Ping;

    #[test]
    fn test_single_and_typed_access() {
        let map = InterfaceMap::single("com.veles.Echo", Arc::new(Echo));
        assert!(map.contains("com.veles.Echo"));
        assert!(map.get_as::<Echo>("com.veles.Echo").is_some());
        assert!(map.get_as::<Ping>("com.veles.Echo").is_none());
        assert!(map.get("com.veles.Ping").is_none());
    }

    #[test]
    fn test_duplicate_interface_rejected() {
        let echo: ServiceObj = Arc::new(Echo);
        let result = InterfaceMap::from_pairs([
            ("com.veles.Echo".to_string(), echo.clone()),
            ("com.veles.Echo".to_string(), echo),
        ]);
        assert!(matches!(
            result,
            Err(FrameworkError::DuplicateInterface { .. })
        ));
    }

    #[test]
    fn test_interfaces_are_ordered() {
        let map = InterfaceMap::from_pairs([
            ("b.Iface".to_string(), Arc::new(Echo) as ServiceObj),
            ("a.Iface".to_string(), Arc::new(Ping) as ServiceObj),
        ])
        .unwrap();
        assert_eq!(map.interfaces(), vec!["a.Iface", "b.Iface"]);
    }

    #[test]
    fn test_same_instances_distinguishes_clones() {
        let obj: ServiceObj = Arc::new(Echo);
        let a = InterfaceMap::from_pairs([("i".to_string(), obj.clone())]).unwrap();
        let b = InterfaceMap::from_pairs([("i".to_string(), obj)]).unwrap();
        let c = InterfaceMap::single("i", Arc::new(Echo));
        assert!(a.same_instances(&b));
        assert!(!a.same_instances(&c));
    }
}
