//! VELES framework core.
//!
//! In-process service-oriented runtime: бандлы публикуют сервисные объекты
//! под строковыми именами интерфейсов, находят чужие сервисы запросами по
//! свойствам и наблюдают lifecycle-события. Ядро отвечает за корректные
//! времена жизни и порядок при конкурентном доступе: индексированный реестр
//! с фильтрами и ранжированием, scoped приобретение с подсчётом
//! использований, validity-gated контексты и синхронный dispatch слушателей.

pub mod bundle;
pub mod bundle_context;
pub mod constants;
pub mod core;
pub mod errors;
pub mod events;
pub mod filter;
pub mod hooks;
pub mod interface_map;
pub mod listeners;
pub mod properties;
pub mod service_entry;
pub mod service_factory;
pub mod service_objects;
pub mod service_reference;
pub mod service_registration;
pub mod service_registry;

pub use bundle::{Bundle, BundleId, BundleState};
pub use bundle_context::BundleContext;
pub use crate::core::Framework;
pub use errors::{FrameworkError, FrameworkResult};
pub use events::{
    BundleEvent, BundleEventKind, FrameworkEvent, FrameworkEventKind, ServiceEvent,
    ServiceEventKind,
};
pub use filter::Filter;
pub use hooks::{EventListenerHook, FindHook, HookToken};
pub use interface_map::{InterfaceMap, ServiceObj};
pub use listeners::{BundleListenerFn, FrameworkListenerFn, ListenerToken, ServiceListenerFn};
pub use properties::{is_reserved_key, Properties, ServiceScope};
pub use service_factory::ServiceFactory;
pub use service_objects::{ServiceGuard, ServiceObjects};
pub use service_reference::ServiceReference;
pub use service_registration::ServiceRegistration;

// Re-export the boot configuration and the workspace-level error (the type
// `Framework::new` returns) so consumers need only this crate.
pub use common::comprehensive_errors::{VelesCoreError, VelesCoreResult};
pub use common::config_base::FrameworkConfig;
