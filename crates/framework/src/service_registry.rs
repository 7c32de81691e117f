//! Service Registry
//!
//! Индексированный стор живых регистраций: вставка, снятие, запросы с
//! фильтром и ранжированием. Реестр — единственный сильный владелец записей;
//! индекс защищён одним RwLock, который никогда не удерживается во время
//! вызова фабрик и слушателей.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use crate::bundle::{Bundle, BundleId};
use crate::constants::{OBJECT_CLASS, SERVICE_ID, SERVICE_RANKING, SERVICE_SCOPE};
use crate::core::CoreContext;
use crate::errors::{FrameworkError, FrameworkResult};
use crate::events::ServiceEventKind;
use crate::filter::Filter;
use crate::interface_map::InterfaceMap;
use crate::properties::{Properties, ServiceScope};
use crate::service_entry::ServiceEntry;
use crate::service_factory::ServiceFactory;
use crate::service_reference::ServiceReference;
use crate::service_registration::ServiceRegistration;

struct RegistryIndex {
    by_id: HashMap<u64, Arc<ServiceEntry>>,
    by_interface: HashMap<String, Vec<Arc<ServiceEntry>>>,
}

pub(crate) struct ServiceRegistry {
    core: Weak<CoreContext>,
    next_id: AtomicU64,
    index: RwLock<RegistryIndex>,
}

impl ServiceRegistry {
    pub(crate) fn new(core: Weak<CoreContext>) -> Self {
        Self {
            core,
            next_id: AtomicU64::new(1),
            index: RwLock::new(RegistryIndex {
                by_id: HashMap::new(),
                by_interface: HashMap::new(),
            }),
        }
    }

    /// Публикация. Назначает `service.id`, внедряет framework-ключи,
    /// вставляет запись и синхронно рассылает REGISTERED.
    pub(crate) fn register(
        &self,
        producer: &Arc<Bundle>,
        interfaces: InterfaceMap,
        supplied: Properties,
        factory: Option<Arc<dyn ServiceFactory>>,
    ) -> FrameworkResult<ServiceRegistration> {
        if interfaces.is_empty() {
            return Err(FrameworkError::invalid_argument(
                "registration requires a non-empty interface map",
            ));
        }

        let scope = match supplied.get(SERVICE_SCOPE) {
            None => ServiceScope::Singleton,
            Some(raw) => raw
                .as_str()
                .and_then(ServiceScope::parse)
                .ok_or_else(|| {
                    FrameworkError::invalid_argument(format!(
                        "unknown service.scope value: {raw}"
                    ))
                })?,
        };
        match (scope, factory.is_some()) {
            (ServiceScope::Singleton, true) => {
                return Err(FrameworkError::invalid_argument(
                    "singleton scope does not take a service factory",
                ));
            }
            (ServiceScope::Bundle | ServiceScope::Prototype, false) => {
                return Err(FrameworkError::invalid_argument(format!(
                    "{scope} scope requires a service factory"
                )));
            }
            _ => {}
        }

        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        let interfaces = Arc::new(interfaces);

        let mut props = Properties::new();
        props.extend_non_reserved(&supplied);
        props.set(SERVICE_ID, id);
        props.set(SERVICE_RANKING, supplied.ranking());
        props.set(SERVICE_SCOPE, scope.as_str());
        props.set(OBJECT_CLASS, interfaces.interfaces());

        let entry = ServiceEntry::new(
            id,
            scope,
            interfaces.clone(),
            producer,
            factory,
            self.core.clone(),
            props,
        );

        {
            let mut index = self.index.write();
            index.by_id.insert(id, entry.clone());
            for interface in interfaces.interfaces() {
                index
                    .by_interface
                    .entry(interface)
                    .or_default()
                    .push(entry.clone());
            }
        }

        info!(
            target: "service_registry",
            service_id = id,
            producer_bundle = producer.id(),
            interfaces = ?interfaces.interfaces(),
            scope = %scope,
            "service registered"
        );

        let reference = ServiceReference::from_entry(entry.clone());
        if let Some(core) = self.core.upgrade() {
            core.listeners()
                .dispatch_service_event(ServiceEventKind::Registered, &reference, None);
        }

        Ok(ServiceRegistration::new(entry, self.core.clone()))
    }

    /// Обновление свойств: незарезервированные ключи заменяются, framework
    /// ключи сохраняются. На время dispatch MODIFIED слушателям доступен
    /// снимок старых свойств.
    pub(crate) fn set_properties(
        &self,
        entry: &Arc<ServiceEntry>,
        props: Properties,
    ) -> FrameworkResult<()> {
        if entry.is_unregistering() {
            return Err(FrameworkError::invalid_state(format!(
                "cannot update properties of unregistering service.id={}",
                entry.id()
            )));
        }

        let (old, _new) = entry.apply_properties_update(&props);
        debug!(target: "service_registry", service_id = entry.id(), "service properties updated");

        let reference = ServiceReference::from_entry(entry.clone());
        if let Some(core) = self.core.upgrade() {
            core.listeners().dispatch_service_event(
                ServiceEventKind::Modified,
                &reference,
                Some(&old),
            );
        }
        entry.clear_previous();
        Ok(())
    }

    /// Снятие с регистрации: запись скрывается от новых запросов, рассылается
    /// UNREGISTERING, затем eager release кэшированных экземпляров. Из стора
    /// запись уходит после обнуления всех use-counts.
    pub(crate) fn unregister(&self, entry: &Arc<ServiceEntry>) -> FrameworkResult<()> {
        entry.begin_unregister()?;

        info!(target: "service_registry", service_id = entry.id(), "service unregistering");

        let reference = ServiceReference::from_entry(entry.clone());
        if let Some(core) = self.core.upgrade() {
            core.listeners().dispatch_service_event(
                ServiceEventKind::Unregistering,
                &reference,
                None,
            );
        }

        entry.eager_release();
        Ok(())
    }

    /// Запрос: кандидаты по интерфейсу (или все), фильтр, find-hooks,
    /// сортировка (ranking desc, id asc).
    pub(crate) fn find(
        &self,
        requesting: &Arc<Bundle>,
        interface: Option<&str>,
        filter: Option<&Filter>,
        all: bool,
    ) -> Vec<ServiceReference> {
        let candidates: Vec<Arc<ServiceEntry>> = {
            let index = self.index.read();
            match interface {
                Some(name) => index
                    .by_interface
                    .get(name)
                    .map(|entries| entries.clone())
                    .unwrap_or_default(),
                None => index.by_id.values().cloned().collect(),
            }
        };

        let mut references: Vec<ServiceReference> = candidates
            .into_iter()
            .filter(|entry| !entry.is_unregistering())
            .filter(|entry| {
                filter
                    .map(|f| f.matches(&entry.properties_snapshot()))
                    .unwrap_or(true)
            })
            .map(ServiceReference::from_entry)
            .collect();

        if let Some(core) = self.core.upgrade() {
            core.hooks()
                .filter_find_results(requesting, interface, all, &mut references);
        }

        references.sort();
        references
    }

    pub(crate) fn get_service_reference(
        &self,
        requesting: &Arc<Bundle>,
        interface: &str,
    ) -> Option<ServiceReference> {
        self.find(requesting, Some(interface), None, false)
            .into_iter()
            .next()
    }

    /// Снять все регистрации бандла; вызывается при его остановке.
    pub(crate) fn unregister_all_for_producer(&self, producer: BundleId) {
        let owned: Vec<Arc<ServiceEntry>> = {
            let index = self.index.read();
            index
                .by_id
                .values()
                .filter(|entry| {
                    entry
                        .producer()
                        .map(|b| b.id() == producer)
                        .unwrap_or(false)
                })
                .cloned()
                .collect()
        };
        for entry in owned {
            // повторный unregister здесь легален: регистратор мог успеть сам
            let _ = self.unregister(&entry);
        }
    }

    /// Финальное удаление записи из индекса (все использования освобождены).
    pub(crate) fn remove_entry(&self, id: u64) {
        let mut index = self.index.write();
        if let Some(entry) = index.by_id.remove(&id) {
            for interface in entry.interfaces().interfaces() {
                if let Some(entries) = index.by_interface.get_mut(&interface) {
                    entries.retain(|candidate| !Arc::ptr_eq(candidate, &entry));
                    if entries.is_empty() {
                        index.by_interface.remove(&interface);
                    }
                }
            }
            debug!(target: "service_registry", service_id = id, "service entry removed");
        }
    }

    /// Число записей в сторе (включая скрытые unregistering-записи с живыми
    /// использованиями).
    pub(crate) fn entry_count(&self) -> usize {
        self.index.read().by_id.len()
    }
}
