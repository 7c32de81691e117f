//! Service Reference
//!
//! Стабильный сравнимый handle на регистрацию. Ссылка остаётся синтаксически
//! валидной после unregister, но разыменовывающие операции возвращают пустой
//! результат. Порядок сортировки — порядок выбора: больший ranking раньше,
//! при равенстве — меньший `service.id`.

use serde_json::Value;
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::bundle::Bundle;
use crate::properties::{Properties, ServiceScope};
use crate::service_entry::ServiceEntry;

#[derive(Clone)]
pub struct ServiceReference {
    entry: Arc<ServiceEntry>,
}

impl ServiceReference {
    pub(crate) fn from_entry(entry: Arc<ServiceEntry>) -> Self {
        Self { entry }
    }

    pub(crate) fn entry(&self) -> &Arc<ServiceEntry> {
        &self.entry
    }

    pub fn service_id(&self) -> u64 {
        self.entry.id()
    }

    pub fn ranking(&self) -> i64 {
        self.entry.ranking()
    }

    pub fn scope(&self) -> ServiceScope {
        self.entry.scope()
    }

    /// Снимок текущих свойств.
    pub fn properties(&self) -> Properties {
        self.entry.properties_snapshot()
    }

    pub fn get_property(&self, key: &str) -> Option<Value> {
        self.entry.properties_snapshot().get(key).cloned()
    }

    /// Снимок свойств до обновления. Определён только во время dispatch
    /// события MODIFIED/MODIFIED_ENDMATCH.
    pub fn previous_properties(&self) -> Option<Properties> {
        self.entry.previous_snapshot()
    }

    /// Имена интерфейсов регистрации (== `objectClass`).
    pub fn interfaces(&self) -> Vec<String> {
        self.entry.interfaces().interfaces()
    }

    pub fn provides(&self, interface: &str) -> bool {
        self.entry.interfaces().contains(interface)
    }

    /// Производящий бандл; `None`, если он уже снесён.
    pub fn producer_bundle(&self) -> Option<Arc<Bundle>> {
        self.entry.producer()
    }

    /// `false` после начала unregister.
    pub fn is_valid(&self) -> bool {
        !self.entry.is_unregistering()
    }

    /// Текущий use-count потребителя (инвариант: равен числу
    /// неосвобождённых приобретений).
    pub fn use_count_for(&self, bundle: &Bundle) -> u32 {
        self.entry.use_count_for(bundle.id())
    }

    /// Число живых прототипных экземпляров потребителя.
    pub fn prototype_count_for(&self, bundle: &Bundle) -> usize {
        self.entry.prototype_count_for(bundle.id())
    }
}

impl PartialEq for ServiceReference {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }
}

impl Eq for ServiceReference {}

impl Hash for ServiceReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.entry.id().hash(state);
    }
}

impl PartialOrd for ServiceReference {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ServiceReference {
    /// `a < b` означает «a выбирается раньше b»: сортировка по убыванию
    /// ranking, затем по возрастанию id. `sort()` даёт список от лучшего.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .ranking()
            .cmp(&self.ranking())
            .then_with(|| self.service_id().cmp(&other.service_id()))
    }
}

impl std::fmt::Debug for ServiceReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceReference")
            .field("service_id", &self.service_id())
            .field("ranking", &self.ranking())
            .field("interfaces", &self.interfaces())
            .finish()
    }
}
