//! Service Factory
//!
//! Пара производитель/освободитель для bundle- и prototype-scoped
//! регистраций. Callbacks пользовательские: паники гасятся на границе и
//! превращаются в `FactoryFailure`, use-count при неудаче не начисляется.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::bundle::Bundle;
use crate::errors::{FrameworkError, FrameworkResult};
use crate::interface_map::InterfaceMap;
use crate::service_reference::ServiceReference;

/// Фабрика сервисных экземпляров.
///
/// `get_service` обязана вернуть карту, содержащую каждое имя интерфейса,
/// заявленное при регистрации; неполная карта трактуется как отказ фабрики.
pub trait ServiceFactory: Send + Sync {
    fn get_service(
        &self,
        bundle: &Arc<Bundle>,
        registration: &ServiceReference,
    ) -> FrameworkResult<InterfaceMap>;

    /// Освобождение экземпляра. `bundle` может отсутствовать, если
    /// потребляющий бандл уже снесён к моменту освобождения.
    fn unget_service(
        &self,
        bundle: Option<&Arc<Bundle>>,
        registration: &ServiceReference,
        map: Arc<InterfaceMap>,
    );
}

/// Вызвать `get_service`, погасив панику и проверив полноту карты.
pub(crate) fn invoke_factory_get(
    factory: &Arc<dyn ServiceFactory>,
    bundle: &Arc<Bundle>,
    registration: &ServiceReference,
    promised: &[String],
) -> FrameworkResult<InterfaceMap> {
    let service_id = registration.service_id();

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        factory.get_service(bundle, registration)
    }));

    let map = match outcome {
        Ok(Ok(map)) => map,
        Ok(Err(err)) => {
            return Err(FrameworkError::FactoryFailure {
                service_id,
                reason: format!("factory returned error: {err}"),
            });
        }
        Err(panic) => {
            return Err(FrameworkError::FactoryFailure {
                service_id,
                reason: format!("factory panicked: {}", panic_message(&panic)),
            });
        }
    };

    for interface in promised {
        if !map.contains(interface) {
            return Err(FrameworkError::FactoryFailure {
                service_id,
                reason: format!("factory omitted promised interface '{interface}'"),
            });
        }
    }

    Ok(map)
}

/// Вызвать `unget_service`, погасив панику. Возвращает текст паники для
/// диагностики, если она была.
pub(crate) fn invoke_factory_unget(
    factory: &Arc<dyn ServiceFactory>,
    bundle: Option<&Arc<Bundle>>,
    registration: &ServiceReference,
    map: Arc<InterfaceMap>,
) -> Option<String> {
    catch_unwind(AssertUnwindSafe(|| {
        factory.unget_service(bundle, registration, map)
    }))
    .err()
    .map(|panic| panic_message(&panic))
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
