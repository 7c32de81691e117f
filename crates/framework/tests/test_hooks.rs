use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use tempfile::TempDir;

use framework::{
    Bundle, EventListenerHook, FindHook, Framework, FrameworkConfig, InterfaceMap, ListenerToken,
    Properties, ServiceEvent, ServiceEventKind, ServiceReference,
};

struct Echo;

fn boot() -> Result<(TempDir, Framework)> {
    let dir = tempfile::tempdir()?;
    let fw = Framework::new(FrameworkConfig::testing().with_storage_root(dir.path()))?;
    Ok((dir, fw))
}

/// Hides services carrying `(hidden=true)` from every non-`all` query.
struct HiddenPropertyHook;

impl FindHook for HiddenPropertyHook {
    fn find(
        &self,
        _requesting: &Arc<Bundle>,
        _interface: Option<&str>,
        all: bool,
        references: &mut Vec<ServiceReference>,
    ) {
        if all {
            return;
        }
        references.retain(|r| {
            r.get_property("hidden")
                .and_then(|v| v.as_bool())
                .map(|hidden| !hidden)
                .unwrap_or(true)
        });
    }
}

/// Masks every recipient of REGISTERED events.
struct MuteRegisteredHook;

impl EventListenerHook for MuteRegisteredHook {
    fn event(&self, event: &ServiceEvent, recipients: &mut Vec<ListenerToken>) {
        if event.kind == ServiceEventKind::Registered {
            recipients.clear();
        }
    }
}

#[test]
fn test_find_hook_masks_results_unless_all_requested() -> Result<()> {
    let (_dir, fw) = boot()?;
    let bundle = fw.install_bundle("test://hooks");
    let ctx = bundle.start()?;

    ctx.register_service(
        InterfaceMap::single("com.veles.Echo", Arc::new(Echo)),
        Properties::new().with("hidden", true),
    )?;
    ctx.register_service(
        InterfaceMap::single("com.veles.Echo", Arc::new(Echo)),
        Properties::new(),
    )?;

    // without hooks both are visible
    assert_eq!(ctx.get_service_references(Some("com.veles.Echo"), None)?.len(), 2);

    let token = fw.add_find_hook(Arc::new(HiddenPropertyHook));
    assert_eq!(ctx.get_service_references(Some("com.veles.Echo"), None)?.len(), 1);
    assert_eq!(
        ctx.get_all_service_references(Some("com.veles.Echo"), None)?.len(),
        2,
        "all-flag queries bypass visibility hooks"
    );

    assert!(fw.remove_hook(token));
    assert!(!fw.remove_hook(token));
    assert_eq!(ctx.get_service_references(Some("com.veles.Echo"), None)?.len(), 2);
    Ok(())
}

#[test]
fn test_event_hook_masks_listener_recipients() -> Result<()> {
    let (_dir, fw) = boot()?;
    let bundle = fw.install_bundle("test://hooks");
    let ctx = bundle.start()?;

    let seen: Arc<Mutex<Vec<ServiceEventKind>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    ctx.add_service_listener(
        Arc::new(move |event| sink.lock().push(event.kind)),
        None,
    )?;

    fw.add_event_hook(Arc::new(MuteRegisteredHook));

    let reg = ctx.register_service(
        InterfaceMap::single("com.veles.Echo", Arc::new(Echo)),
        Properties::new(),
    )?;
    assert!(seen.lock().is_empty(), "REGISTERED was masked by the hook");

    reg.unregister()?;
    assert_eq!(
        *seen.lock(),
        vec![ServiceEventKind::Unregistering],
        "other event kinds pass through"
    );
    Ok(())
}
