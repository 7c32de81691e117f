//! Acquisition guards.
//!
//! Публичные пути приобретения возвращают guard: его disposal — единственный
//! путь освобождения. Drop идемпотентен, безопасен из любого потока и
//! никогда не паникует: ошибки времени teardown гасятся, диагностика уходит
//! в tracing, пока sink жив.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::warn;

use crate::bundle::{Bundle, BundleId};
use crate::bundle_context::BundleContext;
use crate::errors::FrameworkResult;
use crate::interface_map::InterfaceMap;
use crate::properties::ServiceScope;
use crate::service_reference::ServiceReference;

/// Guard одного приобретения. Удерживает карту интерфейсов живой независимо
/// от судьбы регистрации: после unregister уже выданные guards продолжают
/// разыменовываться до собственного disposal.
pub struct ServiceGuard {
    map: Arc<InterfaceMap>,
    reference: ServiceReference,
    consumer: Weak<Bundle>,
    consumer_id: BundleId,
    /// Guard прототипного экземпляра освобождает именно свой экземпляр.
    prototype: bool,
    released: AtomicBool,
}

impl ServiceGuard {
    pub(crate) fn new(
        map: Arc<InterfaceMap>,
        reference: ServiceReference,
        consumer: &Arc<Bundle>,
        prototype: bool,
    ) -> Self {
        Self {
            map,
            reference,
            consumer: Arc::downgrade(consumer),
            consumer_id: consumer.id(),
            prototype,
            released: AtomicBool::new(false),
        }
    }

    /// Карта интерфейсов этого приобретения.
    pub fn interface_map(&self) -> &Arc<InterfaceMap> {
        &self.map
    }

    /// Типизированный доступ к интерфейсу по имени.
    pub fn get<T: Send + Sync + 'static>(&self, interface: &str) -> Option<Arc<T>> {
        self.map.get_as::<T>(interface)
    }

    pub fn reference(&self) -> &ServiceReference {
        &self.reference
    }

    /// Явное освобождение. Идемпотентно; Drop делает то же самое.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }

        let entry = self.reference.entry().clone();
        let consumer = self.consumer.upgrade();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            if self.prototype {
                entry.unget_prototype(self.consumer_id, consumer.as_ref(), &self.map)
            } else {
                entry.unget_service(self.consumer_id, consumer.as_ref())
            }
        }));

        if outcome.is_err() {
            // teardown races must never escape a destructor
            warn!(
                target: "service_objects",
                service_id = self.reference.service_id(),
                consumer_bundle = self.consumer_id,
                "guard release panicked; acquisition dropped without unget"
            );
        }
    }
}

impl Drop for ServiceGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ServiceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceGuard")
            .field("service_id", &self.reference.service_id())
            .field("consumer_bundle", &self.consumer_id)
            .field("prototype", &self.prototype)
            .finish()
    }
}

/// Фасад per-acquisition приобретений для одной ссылки.
///
/// Для prototype scope каждый `get_service` даёт свежий экземпляр с
/// собственным guard; для остальных scope поведение совпадает с
/// `BundleContext::get_service`.
pub struct ServiceObjects {
    context: BundleContext,
    reference: ServiceReference,
}

impl ServiceObjects {
    pub(crate) fn new(context: BundleContext, reference: ServiceReference) -> Self {
        Self { context, reference }
    }

    pub fn get_reference(&self) -> &ServiceReference {
        &self.reference
    }

    /// Приобрести экземпляр. `Ok(None)` — сервис снимается с регистрации или
    /// фабрика отказала (framework WARNING уже разослан).
    pub fn get_service(&self) -> FrameworkResult<Option<ServiceGuard>> {
        let (bundle, _core) = self.context.checked()?;
        let entry = self.reference.entry();

        let guard = if self.reference.scope() == ServiceScope::Prototype {
            entry
                .get_prototype_map(&bundle)
                .map(|map| ServiceGuard::new(map, self.reference.clone(), &bundle, true))
        } else {
            entry
                .get_service_map(&bundle)
                .map(|map| ServiceGuard::new(map, self.reference.clone(), &bundle, false))
        };
        Ok(guard)
    }
}
