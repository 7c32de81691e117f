//! Registration handle.
//!
//! Возвращается регистратору из `register_service`. Операции: обновление
//! свойств, снятие с регистрации, получение ссылки.

use std::sync::{Arc, Weak};

use crate::core::CoreContext;
use crate::errors::{FrameworkError, FrameworkResult};
use crate::properties::Properties;
use crate::service_entry::ServiceEntry;
use crate::service_reference::ServiceReference;

#[derive(Clone)]
pub struct ServiceRegistration {
    entry: Arc<ServiceEntry>,
    core: Weak<CoreContext>,
}

impl ServiceRegistration {
    pub(crate) fn new(entry: Arc<ServiceEntry>, core: Weak<CoreContext>) -> Self {
        Self { entry, core }
    }

    pub fn get_reference(&self) -> ServiceReference {
        ServiceReference::from_entry(self.entry.clone())
    }

    /// Заменить незарезервированные свойства; framework-ключи сохраняются.
    /// Рассылает MODIFIED (или MODIFIED_ENDMATCH — см. listener registry).
    pub fn set_properties(&self, props: Properties) -> FrameworkResult<()> {
        let core = self
            .core
            .upgrade()
            .ok_or_else(|| FrameworkError::invalid_state("framework is shut down"))?;
        core.registry().set_properties(&self.entry, props)
    }

    /// Снять регистрацию. Повторный вызов — `InvalidState`.
    pub fn unregister(&self) -> FrameworkResult<()> {
        let core = self
            .core
            .upgrade()
            .ok_or_else(|| FrameworkError::invalid_state("framework is shut down"))?;
        core.registry().unregister(&self.entry)
    }
}

impl std::fmt::Debug for ServiceRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistration")
            .field("service_id", &self.entry.id())
            .finish()
    }
}
