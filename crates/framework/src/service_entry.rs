//! Service Entry
//!
//! Одна живая регистрация: карта интерфейсов, свойства, таблица
//! использования по потребителям и прототипные экземпляры. Вся изменяемая
//! часть — за одним per-entry mutex; фабричные callbacks вызываются строго
//! вне framework-локов.
//!
//! Инварианты:
//! - `service.id` и `service.scope` неизменны всё время жизни записи;
//! - `objectClass` равен упорядоченным ключам карты интерфейсов;
//! - запись видима в запросах реестра iff `unregistering == false`;
//! - singleton-кэш хранит одну и ту же карту для каждого потребителя,
//!   prototype-приобретение всегда даёт отличный экземпляр.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use crate::bundle::{Bundle, BundleId};
use crate::core::CoreContext;
use crate::errors::{FrameworkError, FrameworkResult};
use crate::events::FrameworkEventKind;
use crate::interface_map::InterfaceMap;
use crate::properties::{is_reserved_key, Properties, ServiceScope};
use crate::service_factory::{invoke_factory_get, invoke_factory_unget, ServiceFactory};
use crate::service_reference::ServiceReference;

struct UseEntry {
    count: u32,
    cached: Arc<InterfaceMap>,
}

struct EntryState {
    properties: Properties,
    /// Снимок свойств до обновления; заполнен только на время dispatch
    /// события MODIFIED.
    previous: Option<Properties>,
    unregistering: bool,
    uses: HashMap<BundleId, UseEntry>,
    prototypes: HashMap<BundleId, Vec<Arc<InterfaceMap>>>,
}

pub(crate) struct ServiceEntry {
    id: u64,
    scope: ServiceScope,
    interfaces: Arc<InterfaceMap>,
    producer: Weak<Bundle>,
    factory: Option<Arc<dyn ServiceFactory>>,
    core: Weak<CoreContext>,
    /// Кэш ranking для lock-free сортировки ссылок.
    ranking: AtomicI64,
    state: Mutex<EntryState>,
}

impl ServiceEntry {
    pub(crate) fn new(
        id: u64,
        scope: ServiceScope,
        interfaces: Arc<InterfaceMap>,
        producer: &Arc<Bundle>,
        factory: Option<Arc<dyn ServiceFactory>>,
        core: Weak<CoreContext>,
        properties: Properties,
    ) -> Arc<Self> {
        let ranking = properties.ranking();
        Arc::new(Self {
            id,
            scope,
            interfaces,
            producer: Arc::downgrade(producer),
            factory,
            core,
            ranking: AtomicI64::new(ranking),
            state: Mutex::new(EntryState {
                properties,
                previous: None,
                unregistering: false,
                uses: HashMap::new(),
                prototypes: HashMap::new(),
            }),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn scope(&self) -> ServiceScope {
        self.scope
    }

    pub(crate) fn ranking(&self) -> i64 {
        self.ranking.load(Ordering::Acquire)
    }

    pub(crate) fn interfaces(&self) -> &Arc<InterfaceMap> {
        &self.interfaces
    }

    pub(crate) fn producer(&self) -> Option<Arc<Bundle>> {
        self.producer.upgrade()
    }

    pub(crate) fn properties_snapshot(&self) -> Properties {
        self.state.lock().properties.clone()
    }

    pub(crate) fn previous_snapshot(&self) -> Option<Properties> {
        self.state.lock().previous.clone()
    }

    pub(crate) fn is_unregistering(&self) -> bool {
        self.state.lock().unregistering
    }

    pub(crate) fn use_count_for(&self, consumer: BundleId) -> u32 {
        self.state
            .lock()
            .uses
            .get(&consumer)
            .map(|u| u.count)
            .unwrap_or(0)
    }

    pub(crate) fn prototype_count_for(&self, consumer: BundleId) -> usize {
        self.state
            .lock()
            .prototypes
            .get(&consumer)
            .map(Vec::len)
            .unwrap_or(0)
    }

    fn reference(self: &Arc<Self>) -> ServiceReference {
        ServiceReference::from_entry(self.clone())
    }

    fn report_factory_failure(&self, consumer: BundleId, err: &FrameworkError) {
        warn!(
            target: "service_registry",
            service_id = self.id,
            consumer_bundle = consumer,
            "{err}"
        );
        if let Some(core) = self.core.upgrade() {
            core.emit_framework_event(FrameworkEventKind::Warning, Some(consumer), err.to_string());
        }
    }

    /// Приобретение для singleton/bundle scope. Возвращает `None`, если
    /// запись снимается с регистрации или фабрика отказала.
    pub(crate) fn get_service_map(
        self: &Arc<Self>,
        consumer: &Arc<Bundle>,
    ) -> Option<Arc<InterfaceMap>> {
        let consumer_id = consumer.id();

        {
            let mut st = self.state.lock();
            if st.unregistering {
                return None;
            }
            match self.scope {
                ServiceScope::Singleton => {
                    let entry = st.uses.entry(consumer_id).or_insert_with(|| UseEntry {
                        count: 0,
                        cached: self.interfaces.clone(),
                    });
                    entry.count += 1;
                    return Some(entry.cached.clone());
                }
                // prototype scope acquired through the plain path behaves
                // like bundle scope: one cached instance per consumer
                ServiceScope::Bundle | ServiceScope::Prototype => {
                    if let Some(entry) = st.uses.get_mut(&consumer_id) {
                        entry.count += 1;
                        return Some(entry.cached.clone());
                    }
                    // first acquisition: fall through to the factory call
                    // below, outside the entry lock
                }
            }
        }

        let factory = self.factory.clone()?;
        let registration = self.reference();
        let promised = self.interfaces.interfaces();
        let map = match invoke_factory_get(&factory, consumer, &registration, &promised) {
            Ok(map) => Arc::new(map),
            Err(err) => {
                self.report_factory_failure(consumer_id, &err);
                return None;
            }
        };

        let duplicate = {
            let mut st = self.state.lock();
            if st.unregistering {
                Some(map.clone())
            } else if let Some(entry) = st.uses.get_mut(&consumer_id) {
                // lost the first-acquisition race: keep the winner's instance
                entry.count += 1;
                let cached = entry.cached.clone();
                drop(st);
                self.dispose_with_factory(&factory, Some(consumer), map);
                return Some(cached);
            } else {
                st.uses.insert(
                    consumer_id,
                    UseEntry {
                        count: 1,
                        cached: map.clone(),
                    },
                );
                None
            }
        };

        match duplicate {
            Some(instance) => {
                // unregistered while the factory ran
                self.dispose_with_factory(&factory, Some(consumer), instance);
                None
            }
            None => Some(map),
        }
    }

    /// Прототипное приобретение: каждый вызов — новый экземпляр.
    pub(crate) fn get_prototype_map(
        self: &Arc<Self>,
        consumer: &Arc<Bundle>,
    ) -> Option<Arc<InterfaceMap>> {
        if self.scope != ServiceScope::Prototype {
            return self.get_service_map(consumer);
        }
        let consumer_id = consumer.id();

        if self.state.lock().unregistering {
            return None;
        }

        let factory = self.factory.clone()?;
        let registration = self.reference();
        let promised = self.interfaces.interfaces();
        let map = match invoke_factory_get(&factory, consumer, &registration, &promised) {
            Ok(map) => Arc::new(map),
            Err(err) => {
                self.report_factory_failure(consumer_id, &err);
                return None;
            }
        };

        {
            let mut st = self.state.lock();
            if st.unregistering {
                drop(st);
                self.dispose_with_factory(&factory, Some(consumer), map);
                return None;
            }
            st.prototypes.entry(consumer_id).or_default().push(map.clone());
        }

        Some(map)
    }

    /// Освобождение singleton/bundle приобретения. `false`, если для
    /// потребителя нет начисленного использования (например, после eager
    /// release при unregister).
    pub(crate) fn unget_service(
        self: &Arc<Self>,
        consumer_id: BundleId,
        consumer: Option<&Arc<Bundle>>,
    ) -> bool {
        let released = {
            let mut st = self.state.lock();
            match st.uses.get_mut(&consumer_id) {
                Some(entry) => {
                    entry.count -= 1;
                    if entry.count == 0 {
                        st.uses.remove(&consumer_id).map(|u| u.cached)
                    } else {
                        return true;
                    }
                }
                None => {
                    debug!(
                        target: "service_registry",
                        service_id = self.id,
                        consumer_bundle = consumer_id,
                        "unget without outstanding use"
                    );
                    return false;
                }
            }
        };

        if let Some(cached) = released {
            if self.scope != ServiceScope::Singleton {
                if let Some(factory) = self.factory.clone() {
                    self.dispose_with_factory(&factory, consumer, cached);
                }
            }
        }

        self.maybe_remove_from_registry();
        true
    }

    /// Освобождение конкретного прототипного экземпляра.
    pub(crate) fn unget_prototype(
        self: &Arc<Self>,
        consumer_id: BundleId,
        consumer: Option<&Arc<Bundle>>,
        map: &Arc<InterfaceMap>,
    ) -> bool {
        let removed = {
            let mut st = self.state.lock();
            let Some(list) = st.prototypes.get_mut(&consumer_id) else {
                debug!(
                    target: "service_registry",
                    service_id = self.id,
                    consumer_bundle = consumer_id,
                    "prototype unget without outstanding instances"
                );
                return false;
            };
            let position = list
                .iter()
                .position(|candidate| Arc::ptr_eq(candidate, map))
                .or_else(|| {
                    list.iter()
                        .position(|candidate| candidate.same_instances(map))
                });
            match position {
                Some(idx) => {
                    let instance = list.remove(idx);
                    if list.is_empty() {
                        st.prototypes.remove(&consumer_id);
                    }
                    instance
                }
                None => {
                    debug!(
                        target: "service_registry",
                        service_id = self.id,
                        consumer_bundle = consumer_id,
                        "prototype unget with unknown instance"
                    );
                    return false;
                }
            }
        };

        if let Some(factory) = self.factory.clone() {
            self.dispose_with_factory(&factory, consumer, removed);
        }
        self.maybe_remove_from_registry();
        true
    }

    /// Скрыть запись от новых запросов. Повторный вызов — ошибка состояния.
    pub(crate) fn begin_unregister(&self) -> FrameworkResult<()> {
        let mut st = self.state.lock();
        if st.unregistering {
            return Err(FrameworkError::invalid_state(format!(
                "service.id={} is already unregistering",
                self.id
            )));
        }
        st.unregistering = true;
        Ok(())
    }

    /// Eager release при unregister: прототипные экземпляры и bundle-scoped
    /// кэш освобождаются через фабрику. Singleton-использования остаются за
    /// живыми guards и дорабатывают до их disposal.
    pub(crate) fn eager_release(self: &Arc<Self>) {
        let (prototypes, bundle_cached) = {
            let mut st = self.state.lock();
            let prototypes = std::mem::take(&mut st.prototypes);
            let bundle_cached: Vec<(BundleId, Arc<InterfaceMap>)> =
                if self.scope != ServiceScope::Singleton {
                    st.uses.drain().map(|(id, u)| (id, u.cached)).collect()
                } else {
                    Vec::new()
                };
            (prototypes, bundle_cached)
        };

        if let Some(factory) = self.factory.clone() {
            let host_lookup = |id: BundleId| {
                self.core
                    .upgrade()
                    .and_then(|core| core.host().get_bundle(id))
            };
            for (consumer_id, instances) in prototypes {
                let consumer = host_lookup(consumer_id);
                for instance in instances {
                    self.dispose_with_factory(&factory, consumer.as_ref(), instance);
                }
            }
            for (consumer_id, cached) in bundle_cached {
                let consumer = host_lookup(consumer_id);
                self.dispose_with_factory(&factory, consumer.as_ref(), cached);
            }
        }

        self.maybe_remove_from_registry();
    }

    /// Обновление свойств: незарезервированные ключи заменяются, framework
    /// ключи переносятся из старой карты (`service.ranking` регистратор
    /// может переопределить). Возвращает снимки (old, new) для dispatch.
    pub(crate) fn apply_properties_update(
        &self,
        new_props: &Properties,
    ) -> (Properties, Properties) {
        let mut st = self.state.lock();
        let old = st.properties.clone();

        let mut merged = Properties::new();
        merged.extend_non_reserved(new_props);
        for (key, value) in old.iter() {
            if is_reserved_key(key) {
                merged.set(key.clone(), value.clone());
            }
        }
        if new_props.contains_key(crate::constants::SERVICE_RANKING) {
            merged.set(crate::constants::SERVICE_RANKING, new_props.ranking());
        }

        self.ranking.store(merged.ranking(), Ordering::Release);
        st.previous = Some(old.clone());
        st.properties = merged.clone();
        (old, merged)
    }

    pub(crate) fn clear_previous(&self) {
        self.state.lock().previous = None;
    }

    fn dispose_with_factory(
        self: &Arc<Self>,
        factory: &Arc<dyn ServiceFactory>,
        consumer: Option<&Arc<Bundle>>,
        map: Arc<InterfaceMap>,
    ) {
        let registration = self.reference();
        if let Some(panic_msg) = invoke_factory_unget(factory, consumer, &registration, map) {
            warn!(
                target: "service_registry",
                service_id = self.id,
                "unget_service panicked: {panic_msg}"
            );
            if let Some(core) = self.core.upgrade() {
                core.emit_framework_event(
                    FrameworkEventKind::Warning,
                    consumer.map(|b| b.id()),
                    format!(
                        "unget_service panicked for service.id={}: {panic_msg}",
                        self.id
                    ),
                );
            }
        }
    }

    /// Финальное удаление из стора реестра: только после unregister и
    /// обнуления всех использований. Entry-лок к этому моменту отпущен —
    /// порядок взятия локов запрещает идти из (2) в (1).
    fn maybe_remove_from_registry(self: &Arc<Self>) {
        let done = {
            let st = self.state.lock();
            st.unregistering && st.uses.is_empty() && st.prototypes.is_empty()
        };
        if done {
            if let Some(core) = self.core.upgrade() {
                core.registry().remove_entry(self.id);
            }
        }
    }
}

impl std::fmt::Debug for ServiceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceEntry")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .field("interfaces", &self.interfaces.interfaces())
            .finish()
    }
}
