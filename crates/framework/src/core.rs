//! Core framework state.
//!
//! `CoreContext` владеет реестром сервисов, таблицами слушателей, hooks и
//! host-таблицей бандлов; подсистемы держат weak-ссылку назад, так что
//! teardown-гонки распознаваемы без циклического владения. `Framework` —
//! публичная точка загрузки, профили конфигурации — в `common`.

use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

use common::comprehensive_errors::{StorageError, VelesCoreError, VelesCoreResult};
use common::config_base::FrameworkConfig;

use crate::bundle::{Bundle, BundleHost, BundleId};
use crate::events::{FrameworkEvent, FrameworkEventKind};
use crate::hooks::{EventListenerHook, FindHook, HookRegistry, HookToken};
use crate::listeners::ListenerRegistry;
use crate::properties::Properties;
use crate::service_registry::ServiceRegistry;

pub(crate) struct CoreContext {
    framework_properties: Properties,
    registry: ServiceRegistry,
    listeners: ListenerRegistry,
    hooks: HookRegistry,
    host: BundleHost,
}

impl CoreContext {
    pub(crate) fn framework_properties(&self) -> &Properties {
        &self.framework_properties
    }

    pub(crate) fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub(crate) fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    pub(crate) fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub(crate) fn host(&self) -> &BundleHost {
        &self.host
    }

    /// Framework событие: зеркалится в tracing и рассылается слушателям.
    pub(crate) fn emit_framework_event(
        &self,
        kind: FrameworkEventKind,
        bundle_id: Option<BundleId>,
        message: String,
    ) {
        match kind {
            FrameworkEventKind::Info => {
                info!(target: "framework", bundle_id, "{message}");
            }
            FrameworkEventKind::Warning => {
                warn!(target: "framework", bundle_id, "{message}");
            }
            FrameworkEventKind::Error => {
                error!(target: "framework", bundle_id, "{message}");
            }
        }
        self.listeners.dispatch_framework_event(&FrameworkEvent {
            kind,
            bundle_id,
            message,
        });
    }
}

/// Загруженный экземпляр фреймворка.
pub struct Framework {
    core: Arc<CoreContext>,
}

impl Framework {
    /// Загрузить фреймворк по конфигурации. Seed properties становятся
    /// framework properties, видимыми read-only всем контекстам.
    pub fn new(config: FrameworkConfig) -> VelesCoreResult<Framework> {
        config.validate()?;

        if config.storage.create_on_boot {
            std::fs::create_dir_all(&config.storage.root).map_err(|e| {
                VelesCoreError::Storage(StorageError::CreateDir {
                    path: config.storage.root.clone(),
                    source: e,
                })
            })?;
        }

        let framework_properties: Properties = config
            .properties
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let storage_root = config.storage.root.clone();

        let core = Arc::new_cyclic(|weak| CoreContext {
            framework_properties,
            registry: ServiceRegistry::new(weak.clone()),
            listeners: ListenerRegistry::new(weak.clone()),
            hooks: HookRegistry::new(),
            host: BundleHost::new(weak.clone(), storage_root),
        });

        info!(target: "framework", "framework booted");
        Ok(Framework { core })
    }

    pub fn get_property(&self, key: &str) -> Option<Value> {
        self.core.framework_properties.get(key).cloned()
    }

    pub fn properties(&self) -> Properties {
        self.core.framework_properties.clone()
    }

    /// Установить бандл с пустым манифестом.
    pub fn install_bundle(&self, location: &str) -> Arc<Bundle> {
        self.core.host.install(location, Properties::new())
    }

    pub fn install_bundle_with_manifest(
        &self,
        location: &str,
        manifest: Properties,
    ) -> Arc<Bundle> {
        self.core.host.install(location, manifest)
    }

    pub fn get_bundle(&self, id: BundleId) -> Option<Arc<Bundle>> {
        self.core.host.get_bundle(id)
    }

    pub fn get_bundles(&self) -> Vec<Arc<Bundle>> {
        self.core.host.get_bundles()
    }

    /// Число записей в сторе реестра (включая скрытые unregistering-записи
    /// с живыми использованиями).
    pub fn service_entry_count(&self) -> usize {
        self.core.registry.entry_count()
    }

    pub fn add_find_hook(&self, hook: Arc<dyn FindHook>) -> HookToken {
        self.core.hooks.add_find_hook(hook)
    }

    pub fn add_event_hook(&self, hook: Arc<dyn EventListenerHook>) -> HookToken {
        self.core.hooks.add_event_hook(hook)
    }

    pub fn remove_hook(&self, token: HookToken) -> bool {
        self.core.hooks.remove_hook(token)
    }
}

impl std::fmt::Debug for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framework")
            .field("bundles", &self.core.host.get_bundles().len())
            .field("services", &self.core.registry.entry_count())
            .finish()
    }
}
