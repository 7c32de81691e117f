//! Bundle Context
//!
//! Per-bundle фасад над реестром, слушателями и host-таблицей. Валидность
//! привязана к активной фазе бандла: каждая операция сначала проверяет флаг
//! и поднимает weak-ссылку на бандл; любая неудача — `ContextInvalidated`.
//! Инвалидация происходит ровно один раз (при остановке бандла) и
//! идемпотентна.

use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

use crate::bundle::{Bundle, BundleId};
use crate::core::CoreContext;
use crate::errors::{FrameworkError, FrameworkResult};
use crate::filter::Filter;
use crate::interface_map::InterfaceMap;
use crate::listeners::{
    BundleListenerFn, FrameworkListenerFn, ListenerToken, ServiceListenerFn,
};
use crate::properties::{Properties, ServiceScope};
use crate::service_factory::ServiceFactory;
use crate::service_objects::{ServiceGuard, ServiceObjects};
use crate::service_reference::ServiceReference;
use crate::service_registration::ServiceRegistration;

pub(crate) struct ContextInner {
    valid: AtomicBool,
    bundle: Weak<Bundle>,
    core: Weak<CoreContext>,
}

impl ContextInner {
    pub(crate) fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }
}

/// Validity-gated handle бандла на ядро фреймворка.
#[derive(Clone)]
pub struct BundleContext {
    inner: Arc<ContextInner>,
}

impl BundleContext {
    pub(crate) fn new(bundle: &Arc<Bundle>, core: &Arc<CoreContext>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                valid: AtomicBool::new(true),
                bundle: Arc::downgrade(bundle),
                core: Arc::downgrade(core),
            }),
        }
    }

    /// Инвалидация при остановке бандла; слушатели контекста снимаются.
    pub(crate) fn invalidate(&self) {
        if self.inner.valid.swap(false, Ordering::AcqRel) {
            if let Some(core) = self.inner.core.upgrade() {
                core.listeners().remove_context_listeners(&self.inner);
            }
            debug!(target: "bundle_context", "context invalidated");
        }
    }

    pub fn is_valid(&self) -> bool {
        self.inner.is_valid()
    }

    /// Проверка валидности + подъём weak-ссылок. Первый шаг каждой операции.
    pub(crate) fn checked(&self) -> FrameworkResult<(Arc<Bundle>, Arc<CoreContext>)> {
        if !self.inner.is_valid() {
            return Err(FrameworkError::ContextInvalidated);
        }
        let bundle = self
            .inner
            .bundle
            .upgrade()
            .ok_or(FrameworkError::ContextInvalidated)?;
        let core = self
            .inner
            .core
            .upgrade()
            .ok_or(FrameworkError::ContextInvalidated)?;
        Ok((bundle, core))
    }

    // --- framework properties -------------------------------------------

    /// Значение framework property; `None`, если ключ отсутствует.
    pub fn get_property(&self, key: &str) -> FrameworkResult<Option<Value>> {
        let (_bundle, core) = self.checked()?;
        Ok(core.framework_properties().get(key).cloned())
    }

    /// Копия framework properties.
    pub fn get_properties(&self) -> FrameworkResult<Properties> {
        let (_bundle, core) = self.checked()?;
        Ok(core.framework_properties().clone())
    }

    // --- bundles ---------------------------------------------------------

    pub fn get_bundle(&self) -> FrameworkResult<Arc<Bundle>> {
        let (bundle, _core) = self.checked()?;
        Ok(bundle)
    }

    pub fn get_bundle_by_id(&self, id: BundleId) -> FrameworkResult<Option<Arc<Bundle>>> {
        let (_bundle, core) = self.checked()?;
        Ok(core.host().get_bundle(id))
    }

    pub fn get_bundles(&self) -> FrameworkResult<Vec<Arc<Bundle>>> {
        let (_bundle, core) = self.checked()?;
        Ok(core.host().get_bundles())
    }

    pub fn get_bundles_at(&self, location: &str) -> FrameworkResult<Vec<Arc<Bundle>>> {
        let (_bundle, core) = self.checked()?;
        Ok(core.host().get_bundles_at(location))
    }

    /// Установка бандла по location; делегируется host-таблице.
    pub fn install_bundles(
        &self,
        location: &str,
        manifest: Properties,
    ) -> FrameworkResult<Vec<Arc<Bundle>>> {
        let (_bundle, core) = self.checked()?;
        Ok(vec![core.host().install(location, manifest)])
    }

    // --- service publication --------------------------------------------

    /// Публикация singleton-сервиса: сам объект в карте интерфейсов.
    pub fn register_service(
        &self,
        interfaces: InterfaceMap,
        properties: Properties,
    ) -> FrameworkResult<ServiceRegistration> {
        let (bundle, core) = self.checked()?;
        core.registry()
            .register(&bundle, interfaces, properties, None)
    }

    /// Публикация через фабрику с явным scope (bundle или prototype).
    pub fn register_service_factory(
        &self,
        interfaces: InterfaceMap,
        properties: Properties,
        scope: ServiceScope,
        factory: Arc<dyn ServiceFactory>,
    ) -> FrameworkResult<ServiceRegistration> {
        let (bundle, core) = self.checked()?;
        let properties = properties.with(crate::constants::SERVICE_SCOPE, scope.as_str());
        core.registry()
            .register(&bundle, interfaces, properties, Some(factory))
    }

    // --- service discovery ----------------------------------------------

    /// Лучшее совпадение по интерфейсу (ranking desc, id asc).
    pub fn get_service_reference(
        &self,
        interface: &str,
    ) -> FrameworkResult<Option<ServiceReference>> {
        let (bundle, core) = self.checked()?;
        Ok(core.registry().get_service_reference(&bundle, interface))
    }

    /// Ранжированный список ссылок. Ошибка разбора фильтра всплывает как
    /// `FilterParse`.
    pub fn get_service_references(
        &self,
        interface: Option<&str>,
        filter_expr: Option<&str>,
    ) -> FrameworkResult<Vec<ServiceReference>> {
        self.find_references(interface, filter_expr, false)
    }

    /// То же, но без маскировки видимости find-hooks.
    pub fn get_all_service_references(
        &self,
        interface: Option<&str>,
        filter_expr: Option<&str>,
    ) -> FrameworkResult<Vec<ServiceReference>> {
        self.find_references(interface, filter_expr, true)
    }

    fn find_references(
        &self,
        interface: Option<&str>,
        filter_expr: Option<&str>,
        all: bool,
    ) -> FrameworkResult<Vec<ServiceReference>> {
        let (bundle, core) = self.checked()?;
        let filter = filter_expr.map(Filter::parse).transpose()?;
        Ok(core
            .registry()
            .find(&bundle, interface, filter.as_ref(), all))
    }

    // --- service acquisition --------------------------------------------

    /// Приобрести сервис. `Ok(None)` — регистрация снимается или фабрика
    /// отказала (WARNING уже разослан). Disposal guard — единственный путь
    /// освобождения.
    pub fn get_service(
        &self,
        reference: &ServiceReference,
    ) -> FrameworkResult<Option<ServiceGuard>> {
        let (bundle, _core) = self.checked()?;
        Ok(reference
            .entry()
            .get_service_map(&bundle)
            .map(|map| ServiceGuard::new(map, reference.clone(), &bundle, false)))
    }

    /// Per-acquisition фасад; для prototype scope каждый вызов даёт новый
    /// экземпляр.
    pub fn service_objects(
        &self,
        reference: &ServiceReference,
    ) -> FrameworkResult<ServiceObjects> {
        self.checked()?;
        Ok(ServiceObjects::new(self.clone(), reference.clone()))
    }

    // --- listeners -------------------------------------------------------

    /// Подписка на сервисные события, опционально с фильтром по свойствам.
    pub fn add_service_listener(
        &self,
        callback: ServiceListenerFn,
        filter_expr: Option<&str>,
    ) -> FrameworkResult<ListenerToken> {
        let (_bundle, core) = self.checked()?;
        let filter = filter_expr.map(Filter::parse).transpose()?;
        Ok(core
            .listeners()
            .add_service_listener(&self.inner, callback, filter))
    }

    pub fn remove_service_listener(&self, callback: &ServiceListenerFn) -> FrameworkResult<bool> {
        let (_bundle, core) = self.checked()?;
        Ok(core
            .listeners()
            .remove_service_listener_by_delegate(callback))
    }

    pub fn add_bundle_listener(&self, callback: BundleListenerFn) -> FrameworkResult<ListenerToken> {
        let (_bundle, core) = self.checked()?;
        Ok(core.listeners().add_bundle_listener(&self.inner, callback))
    }

    pub fn remove_bundle_listener(&self, callback: &BundleListenerFn) -> FrameworkResult<bool> {
        let (_bundle, core) = self.checked()?;
        Ok(core
            .listeners()
            .remove_bundle_listener_by_delegate(callback))
    }

    pub fn add_framework_listener(
        &self,
        callback: FrameworkListenerFn,
    ) -> FrameworkResult<ListenerToken> {
        let (_bundle, core) = self.checked()?;
        Ok(core
            .listeners()
            .add_framework_listener(&self.inner, callback))
    }

    /// Снять слушателя по токену; неизвестный токен — no-op.
    pub fn remove_listener(&self, token: ListenerToken) -> FrameworkResult<bool> {
        let (_bundle, core) = self.checked()?;
        Ok(core.listeners().remove_listener(token))
    }

    // --- persisted surface ----------------------------------------------

    /// Путь `<bundle-data-root>/<name>`; корень создаётся при первом вызове.
    pub fn get_data_file(&self, name: &str) -> FrameworkResult<PathBuf> {
        let (bundle, _core) = self.checked()?;
        let root = bundle.data_root();
        std::fs::create_dir_all(root).map_err(|e| FrameworkError::DataDirectory {
            message: format!("cannot create {}: {e}", root.display()),
        })?;
        Ok(root.join(name))
    }
}

impl std::fmt::Debug for BundleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleContext")
            .field("valid", &self.is_valid())
            .finish()
    }
}
