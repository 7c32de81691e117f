//! Framework event types.
//!
//! Service, bundle and framework events are dispatched synchronously on the
//! thread that caused them (see `listeners`). Service events carry the
//! reference so callbacks can query the current (and, during MODIFIED
//! dispatch, the previous) properties.

use std::fmt;

use crate::bundle::BundleId;
use crate::service_reference::ServiceReference;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceEventKind {
    /// The service has been registered.
    Registered,
    /// The properties of the service have been updated.
    Modified,
    /// The update moved the properties out of a listener's filter scope;
    /// delivered instead of `Modified` to that listener.
    ModifiedEndmatch,
    /// The service is being unregistered.
    Unregistering,
}

impl fmt::Display for ServiceEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceEventKind::Registered => "REGISTERED",
            ServiceEventKind::Modified => "MODIFIED",
            ServiceEventKind::ModifiedEndmatch => "MODIFIED_ENDMATCH",
            ServiceEventKind::Unregistering => "UNREGISTERING",
        };
        f.write_str(name)
    }
}

#[derive(Clone)]
pub struct ServiceEvent {
    pub kind: ServiceEventKind,
    pub reference: ServiceReference,
}

impl fmt::Debug for ServiceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceEvent")
            .field("kind", &self.kind)
            .field("service_id", &self.reference.service_id())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleEventKind {
    Installed,
    Started,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct BundleEvent {
    pub kind: BundleEventKind,
    pub bundle_id: BundleId,
    pub location: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameworkEventKind {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct FrameworkEvent {
    pub kind: FrameworkEventKind,
    /// Bundle the event relates to, if any.
    pub bundle_id: Option<BundleId>,
    pub message: String,
}
