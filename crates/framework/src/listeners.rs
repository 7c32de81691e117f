//! Listener Registry
//!
//! Три таблицы подписчиков: service / bundle / framework. Мутация таблиц
//! сериализована, dispatch идёт по снимку — слушатель может регистрировать
//! и снимать слушателей из собственного callback без deadlock. Паника
//! слушателя гасится и репортится framework ERROR событием, dispatch
//! продолжается.

use parking_lot::Mutex;
use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error};

use crate::bundle_context::ContextInner;
use crate::core::CoreContext;
use crate::events::{
    BundleEvent, FrameworkEvent, FrameworkEventKind, ServiceEvent, ServiceEventKind,
};
use crate::filter::Filter;
use crate::properties::Properties;
use crate::service_reference::ServiceReference;

/// Opaque handle возвращаемый при регистрации слушателя.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerToken(pub(crate) u64);

thread_local! {
    /// Граница рекурсии: паника слушателя внутри dispatch ERROR события,
    /// порождённого другой паникой, логируется без нового события.
    static REPORTING_LISTENER_PANIC: Cell<bool> = Cell::new(false);
}

pub type ServiceListenerFn = Arc<dyn Fn(&ServiceEvent) + Send + Sync>;
pub type BundleListenerFn = Arc<dyn Fn(&BundleEvent) + Send + Sync>;
pub type FrameworkListenerFn = Arc<dyn Fn(&FrameworkEvent) + Send + Sync>;

#[derive(Clone)]
struct ServiceListenerRecord {
    token: ListenerToken,
    ctx: Weak<ContextInner>,
    callback: ServiceListenerFn,
    filter: Option<Filter>,
}

#[derive(Clone)]
struct BundleListenerRecord {
    token: ListenerToken,
    ctx: Weak<ContextInner>,
    callback: BundleListenerFn,
}

#[derive(Clone)]
struct FrameworkListenerRecord {
    token: ListenerToken,
    ctx: Weak<ContextInner>,
    callback: FrameworkListenerFn,
}

pub(crate) struct ListenerRegistry {
    core: Weak<CoreContext>,
    next_token: AtomicU64,
    service: Mutex<Vec<ServiceListenerRecord>>,
    bundle: Mutex<Vec<BundleListenerRecord>>,
    framework: Mutex<Vec<FrameworkListenerRecord>>,
}

impl ListenerRegistry {
    pub(crate) fn new(core: Weak<CoreContext>) -> Self {
        Self {
            core,
            next_token: AtomicU64::new(1),
            service: Mutex::new(Vec::new()),
            bundle: Mutex::new(Vec::new()),
            framework: Mutex::new(Vec::new()),
        }
    }

    fn issue_token(&self) -> ListenerToken {
        ListenerToken(self.next_token.fetch_add(1, Ordering::AcqRel))
    }

    pub(crate) fn add_service_listener(
        &self,
        ctx: &Arc<ContextInner>,
        callback: ServiceListenerFn,
        filter: Option<Filter>,
    ) -> ListenerToken {
        let token = self.issue_token();
        self.service.lock().push(ServiceListenerRecord {
            token,
            ctx: Arc::downgrade(ctx),
            callback,
            filter,
        });
        token
    }

    pub(crate) fn add_bundle_listener(
        &self,
        ctx: &Arc<ContextInner>,
        callback: BundleListenerFn,
    ) -> ListenerToken {
        let token = self.issue_token();
        self.bundle.lock().push(BundleListenerRecord {
            token,
            ctx: Arc::downgrade(ctx),
            callback,
        });
        token
    }

    pub(crate) fn add_framework_listener(
        &self,
        ctx: &Arc<ContextInner>,
        callback: FrameworkListenerFn,
    ) -> ListenerToken {
        let token = self.issue_token();
        self.framework.lock().push(FrameworkListenerRecord {
            token,
            ctx: Arc::downgrade(ctx),
            callback,
        });
        token
    }

    /// Удаление по токену из любой таблицы. Неизвестный токен — no-op.
    pub(crate) fn remove_listener(&self, token: ListenerToken) -> bool {
        {
            let mut table = self.service.lock();
            if let Some(idx) = table.iter().position(|r| r.token == token) {
                table.remove(idx);
                return true;
            }
        }
        {
            let mut table = self.bundle.lock();
            if let Some(idx) = table.iter().position(|r| r.token == token) {
                table.remove(idx);
                return true;
            }
        }
        {
            let mut table = self.framework.lock();
            if let Some(idx) = table.iter().position(|r| r.token == token) {
                table.remove(idx);
                return true;
            }
        }
        debug!(target: "listeners", token = token.0, "remove_listener: unknown token");
        false
    }

    /// Удаление по идентичности callback (тот же `Arc`, что был передан при
    /// регистрации).
    pub(crate) fn remove_service_listener_by_delegate(&self, callback: &ServiceListenerFn) -> bool {
        let mut table = self.service.lock();
        if let Some(idx) = table
            .iter()
            .position(|r| Arc::ptr_eq(&r.callback, callback))
        {
            table.remove(idx);
            return true;
        }
        false
    }

    pub(crate) fn remove_bundle_listener_by_delegate(&self, callback: &BundleListenerFn) -> bool {
        let mut table = self.bundle.lock();
        if let Some(idx) = table
            .iter()
            .position(|r| Arc::ptr_eq(&r.callback, callback))
        {
            table.remove(idx);
            return true;
        }
        false
    }

    /// Снять все слушатели контекста; вызывается при остановке бандла.
    pub(crate) fn remove_context_listeners(&self, ctx: &Arc<ContextInner>) {
        let target = Arc::as_ptr(ctx);
        self.service
            .lock()
            .retain(|r| r.ctx.as_ptr() != target && r.ctx.strong_count() > 0);
        self.bundle
            .lock()
            .retain(|r| r.ctx.as_ptr() != target && r.ctx.strong_count() > 0);
        self.framework
            .lock()
            .retain(|r| r.ctx.as_ptr() != target && r.ctx.strong_count() > 0);
    }

    /// Dispatch сервисного события. Для MODIFIED передаётся снимок старых
    /// свойств: слушатели, чей фильтр совпадал со старыми, но не с новыми,
    /// получают MODIFIED_ENDMATCH.
    pub(crate) fn dispatch_service_event(
        &self,
        kind: ServiceEventKind,
        reference: &ServiceReference,
        old_props: Option<&Properties>,
    ) {
        let current = reference.properties();
        let snapshot: Vec<ServiceListenerRecord> = self.service.lock().clone();

        let mut recipients: Vec<(ListenerToken, ServiceListenerFn, ServiceEventKind)> = Vec::new();
        for record in snapshot {
            let Some(ctx) = record.ctx.upgrade() else {
                continue;
            };
            if !ctx.is_valid() {
                continue;
            }

            let delivered = match (kind, old_props) {
                (ServiceEventKind::Modified, Some(old)) => {
                    let matches_new = record
                        .filter
                        .as_ref()
                        .map(|f| f.matches(&current))
                        .unwrap_or(true);
                    if matches_new {
                        ServiceEventKind::Modified
                    } else {
                        let matches_old = record
                            .filter
                            .as_ref()
                            .map(|f| f.matches(old))
                            .unwrap_or(true);
                        if matches_old {
                            ServiceEventKind::ModifiedEndmatch
                        } else {
                            continue;
                        }
                    }
                }
                _ => {
                    let matched = record
                        .filter
                        .as_ref()
                        .map(|f| f.matches(&current))
                        .unwrap_or(true);
                    if !matched {
                        continue;
                    }
                    kind
                }
            };
            recipients.push((record.token, record.callback, delivered));
        }

        // event hooks may mask recipients before delivery
        if let Some(core) = self.core.upgrade() {
            let probe = ServiceEvent {
                kind,
                reference: reference.clone(),
            };
            let mut tokens: Vec<ListenerToken> = recipients.iter().map(|r| r.0).collect();
            core.hooks().filter_service_recipients(&probe, &mut tokens);
            recipients.retain(|(token, _, _)| tokens.contains(token));
        }

        for (token, callback, delivered) in recipients {
            let event = ServiceEvent {
                kind: delivered,
                reference: reference.clone(),
            };
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                self.report_listener_panic("service", token, &panic);
            }
        }
    }

    /// Широковещательный dispatch bundle события (без фильтров).
    pub(crate) fn dispatch_bundle_event(&self, event: &BundleEvent) {
        let snapshot: Vec<BundleListenerRecord> = self.bundle.lock().clone();
        for record in snapshot {
            let Some(ctx) = record.ctx.upgrade() else {
                continue;
            };
            if !ctx.is_valid() {
                continue;
            }
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| (record.callback)(event))) {
                self.report_listener_panic("bundle", record.token, &panic);
            }
        }
    }

    /// Dispatch framework события. Паники слушателей репортятся ERROR
    /// событием, как и в остальных таблицах; thread-local guard в
    /// `report_listener_panic` не даёт каскаду событий зациклиться.
    pub(crate) fn dispatch_framework_event(&self, event: &FrameworkEvent) {
        let snapshot: Vec<FrameworkListenerRecord> = self.framework.lock().clone();
        for record in snapshot {
            let Some(ctx) = record.ctx.upgrade() else {
                continue;
            };
            if !ctx.is_valid() {
                continue;
            }
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| (record.callback)(event))) {
                self.report_listener_panic("framework", record.token, &panic);
            }
        }
    }

    fn report_listener_panic(
        &self,
        table: &str,
        token: ListenerToken,
        panic: &(dyn std::any::Any + Send),
    ) {
        let detail = if let Some(s) = panic.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = panic.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        error!(
            target: "listeners",
            token = token.0,
            "{table} listener panicked: {detail}"
        );

        // вложенный репорт (паника во время dispatch нашего же ERROR
        // события) останавливается на логе
        let reentrant = REPORTING_LISTENER_PANIC.with(|flag| flag.replace(true));
        if reentrant {
            return;
        }
        if let Some(core) = self.core.upgrade() {
            core.emit_framework_event(
                FrameworkEventKind::Error,
                None,
                format!("{table} listener (token {}) panicked: {detail}", token.0),
            );
        }
        REPORTING_LISTENER_PANIC.with(|flag| flag.set(false));
    }
}
