//! Bundle collaborator.
//!
//! Минимальная запись о бандле: id, location, манифест, data root и
//! состояние. Загрузка кода и разбор манифестов — вне ядра; здесь только то,
//! что нужно реестру и контекстам: идентичность потребителя, lifecycle
//! start/stop и таблица установленных бандлов.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use crate::bundle_context::BundleContext;
use crate::core::CoreContext;
use crate::errors::{FrameworkError, FrameworkResult};
use crate::events::{BundleEvent, BundleEventKind};
use crate::properties::Properties;

pub type BundleId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleState {
    Installed,
    Active,
    Stopped,
}

pub struct Bundle {
    id: BundleId,
    location: String,
    manifest: Properties,
    data_root: PathBuf,
    core: Weak<CoreContext>,
    state: Mutex<BundleState>,
    context: Mutex<Option<BundleContext>>,
}

impl Bundle {
    pub fn id(&self) -> BundleId {
        self.id
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn manifest(&self) -> &Properties {
        &self.manifest
    }

    pub fn state(&self) -> BundleState {
        *self.state.lock()
    }

    pub(crate) fn data_root(&self) -> &Path {
        &self.data_root
    }

    /// Текущий контекст; `None`, пока бандл не активен.
    pub fn context(&self) -> Option<BundleContext> {
        self.context.lock().clone()
    }

    /// Перевести бандл в ACTIVE и выдать валидный контекст. Повторный start
    /// активного бандла возвращает существующий контекст.
    pub fn start(self: &Arc<Self>) -> FrameworkResult<BundleContext> {
        let core = self
            .core
            .upgrade()
            .ok_or(FrameworkError::ContextInvalidated)?;

        let ctx = {
            let mut state = self.state.lock();
            if *state == BundleState::Active {
                let existing = self.context.lock().clone();
                if let Some(existing) = existing {
                    return Ok(existing);
                }
            }
            *state = BundleState::Active;
            let ctx = BundleContext::new(self, &core);
            *self.context.lock() = Some(ctx.clone());
            ctx
        };

        info!(target: "bundle_host", bundle_id = self.id, location = %self.location, "bundle started");
        core.listeners().dispatch_bundle_event(&BundleEvent {
            kind: BundleEventKind::Started,
            bundle_id: self.id,
            location: self.location.clone(),
        });
        Ok(ctx)
    }

    /// Остановить бандл: контекст инвалидируется ровно один раз, его
    /// слушатели снимаются, сервисы бандла снимаются с регистрации.
    /// Повторный stop — no-op.
    pub fn stop(self: &Arc<Self>) -> FrameworkResult<()> {
        let ctx = {
            let mut state = self.state.lock();
            if *state != BundleState::Active {
                return Ok(());
            }
            *state = BundleState::Stopped;
            self.context.lock().take()
        };

        if let Some(ctx) = ctx {
            ctx.invalidate();
        }

        if let Some(core) = self.core.upgrade() {
            core.registry().unregister_all_for_producer(self.id);
            info!(target: "bundle_host", bundle_id = self.id, "bundle stopped");
            core.listeners().dispatch_bundle_event(&BundleEvent {
                kind: BundleEventKind::Stopped,
                bundle_id: self.id,
                location: self.location.clone(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Bundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bundle")
            .field("id", &self.id)
            .field("location", &self.location)
            .field("state", &self.state())
            .finish()
    }
}

/// Таблица установленных бандлов
pub(crate) struct BundleHost {
    core: Weak<CoreContext>,
    storage_root: PathBuf,
    next_id: AtomicU64,
    bundles: RwLock<HashMap<BundleId, Arc<Bundle>>>,
}

impl BundleHost {
    pub(crate) fn new(core: Weak<CoreContext>, storage_root: PathBuf) -> Self {
        Self {
            core,
            storage_root,
            next_id: AtomicU64::new(1),
            bundles: RwLock::new(HashMap::new()),
        }
    }

    /// Установить бандл по location. Data root не создаётся до первого
    /// `get_data_file`.
    pub(crate) fn install(&self, location: &str, manifest: Properties) -> Arc<Bundle> {
        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        let bundle = Arc::new(Bundle {
            id,
            location: location.to_string(),
            manifest,
            data_root: self.storage_root.join(format!("bundle-{id}")),
            core: self.core.clone(),
            state: Mutex::new(BundleState::Installed),
            context: Mutex::new(None),
        });
        self.bundles.write().insert(id, bundle.clone());
        debug!(target: "bundle_host", bundle_id = id, location, "bundle installed");

        if let Some(core) = self.core.upgrade() {
            core.listeners().dispatch_bundle_event(&BundleEvent {
                kind: BundleEventKind::Installed,
                bundle_id: id,
                location: location.to_string(),
            });
        }
        bundle
    }

    pub(crate) fn get_bundle(&self, id: BundleId) -> Option<Arc<Bundle>> {
        self.bundles.read().get(&id).cloned()
    }

    pub(crate) fn get_bundles(&self) -> Vec<Arc<Bundle>> {
        let mut bundles: Vec<Arc<Bundle>> = self.bundles.read().values().cloned().collect();
        bundles.sort_by_key(|b| b.id());
        bundles
    }

    pub(crate) fn get_bundles_at(&self, location: &str) -> Vec<Arc<Bundle>> {
        let mut bundles: Vec<Arc<Bundle>> = self
            .bundles
            .read()
            .values()
            .filter(|b| b.location() == location)
            .cloned()
            .collect();
        bundles.sort_by_key(|b| b.id());
        bundles
    }
}
