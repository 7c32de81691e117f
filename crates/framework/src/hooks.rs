//! Service hooks.
//!
//! External collaborators that can shrink query results (`FindHook`) and mask
//! event recipients (`EventListenerHook`). Hooks run synchronously inside the
//! operation that triggered them, with no framework lock held.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::bundle::Bundle;
use crate::events::ServiceEvent;
use crate::listeners::ListenerToken;
use crate::service_reference::ServiceReference;

/// Removes candidates from the result of a registry query.
pub trait FindHook: Send + Sync {
    fn find(
        &self,
        requesting: &Arc<Bundle>,
        interface: Option<&str>,
        all: bool,
        references: &mut Vec<ServiceReference>,
    );
}

/// Removes listener tokens from the recipient set of a service event.
pub trait EventListenerHook: Send + Sync {
    fn event(&self, event: &ServiceEvent, recipients: &mut Vec<ListenerToken>);
}

/// Opaque handle for removing an installed hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookToken(u64);

struct HookRecord<T: ?Sized> {
    token: HookToken,
    hook: Arc<T>,
}

pub(crate) struct HookRegistry {
    next_token: AtomicU64,
    find_hooks: RwLock<Vec<HookRecord<dyn FindHook>>>,
    event_hooks: RwLock<Vec<HookRecord<dyn EventListenerHook>>>,
}

impl HookRegistry {
    pub(crate) fn new() -> Self {
        Self {
            next_token: AtomicU64::new(1),
            find_hooks: RwLock::new(Vec::new()),
            event_hooks: RwLock::new(Vec::new()),
        }
    }

    fn issue_token(&self) -> HookToken {
        HookToken(self.next_token.fetch_add(1, Ordering::AcqRel))
    }

    pub(crate) fn add_find_hook(&self, hook: Arc<dyn FindHook>) -> HookToken {
        let token = self.issue_token();
        self.find_hooks.write().push(HookRecord { token, hook });
        token
    }

    pub(crate) fn add_event_hook(&self, hook: Arc<dyn EventListenerHook>) -> HookToken {
        let token = self.issue_token();
        self.event_hooks.write().push(HookRecord { token, hook });
        token
    }

    pub(crate) fn remove_hook(&self, token: HookToken) -> bool {
        {
            let mut hooks = self.find_hooks.write();
            if let Some(idx) = hooks.iter().position(|r| r.token == token) {
                hooks.remove(idx);
                return true;
            }
        }
        let mut hooks = self.event_hooks.write();
        if let Some(idx) = hooks.iter().position(|r| r.token == token) {
            hooks.remove(idx);
            return true;
        }
        false
    }

    pub(crate) fn filter_find_results(
        &self,
        requesting: &Arc<Bundle>,
        interface: Option<&str>,
        all: bool,
        references: &mut Vec<ServiceReference>,
    ) {
        let hooks: Vec<Arc<dyn FindHook>> =
            self.find_hooks.read().iter().map(|r| r.hook.clone()).collect();
        for hook in hooks {
            hook.find(requesting, interface, all, references);
        }
    }

    pub(crate) fn filter_service_recipients(
        &self,
        event: &ServiceEvent,
        recipients: &mut Vec<ListenerToken>,
    ) {
        let hooks: Vec<Arc<dyn EventListenerHook>> =
            self.event_hooks.read().iter().map(|r| r.hook.clone()).collect();
        for hook in hooks {
            hook.event(event, recipients);
        }
    }
}
