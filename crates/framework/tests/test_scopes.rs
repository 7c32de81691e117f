use anyhow::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use framework::{
    Bundle, BundleContext, Framework, FrameworkConfig, FrameworkError, FrameworkEventKind,
    InterfaceMap, Properties, ServiceFactory, ServiceReference, ServiceScope,
};

const IFACE: &str = "com.veles.Counter";

struct Counter {
    serial: usize,
}

/// Factory that numbers every produced instance and counts disposals.
struct CountingFactory {
    built: AtomicUsize,
    disposed: AtomicUsize,
}

impl CountingFactory {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            built: AtomicUsize::new(0),
            disposed: AtomicUsize::new(0),
        })
    }
}

impl ServiceFactory for CountingFactory {
    fn get_service(
        &self,
        _bundle: &Arc<Bundle>,
        _registration: &ServiceReference,
    ) -> framework::FrameworkResult<InterfaceMap> {
        let serial = self.built.fetch_add(1, Ordering::SeqCst);
        Ok(InterfaceMap::single(IFACE, Arc::new(Counter { serial })))
    }

    fn unget_service(
        &self,
        _bundle: Option<&Arc<Bundle>>,
        _registration: &ServiceReference,
        _map: Arc<InterfaceMap>,
    ) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Factory that always fails.
struct BrokenFactory {
    panics: bool,
}

impl ServiceFactory for BrokenFactory {
    fn get_service(
        &self,
        _bundle: &Arc<Bundle>,
        _registration: &ServiceReference,
    ) -> framework::FrameworkResult<InterfaceMap> {
        if self.panics {
            panic!("factory exploded");
        }
        Err(FrameworkError::invalid_state("cannot build"))
    }

    fn unget_service(
        &self,
        _bundle: Option<&Arc<Bundle>>,
        _registration: &ServiceReference,
        _map: Arc<InterfaceMap>,
    ) {
    }
}

fn boot() -> Result<(TempDir, Framework)> {
    let dir = tempfile::tempdir()?;
    let fw = Framework::new(FrameworkConfig::testing().with_storage_root(dir.path()))?;
    Ok((dir, fw))
}

fn start_bundle(fw: &Framework, location: &str) -> Result<(Arc<Bundle>, BundleContext)> {
    let bundle = fw.install_bundle(location);
    let ctx = bundle.start()?;
    Ok((bundle, ctx))
}

#[test]
fn test_singleton_returns_shared_map_and_counts_uses() -> Result<()> {
    let (_dir, fw) = boot()?;
    let (provider, provider_ctx) = start_bundle(&fw, "test://provider")?;
    let (_consumer, consumer_ctx) = start_bundle(&fw, "test://consumer")?;

    provider_ctx.register_service(
        InterfaceMap::single(IFACE, Arc::new(Counter { serial: 0 })),
        Properties::new(),
    )?;
    let reference = consumer_ctx.get_service_reference(IFACE)?.unwrap();

    let g1 = consumer_ctx.get_service(&reference)?.unwrap();
    let g2 = consumer_ctx.get_service(&reference)?.unwrap();
    let g3 = provider_ctx.get_service(&reference)?.unwrap();

    // same shared object for every consumer
    let s1 = g1.get::<Counter>(IFACE).unwrap();
    let s2 = g2.get::<Counter>(IFACE).unwrap();
    let s3 = g3.get::<Counter>(IFACE).unwrap();
    assert!(Arc::ptr_eq(&s1, &s2));
    assert!(Arc::ptr_eq(&s1, &s3));

    // per-consumer use counts track unreleased acquisitions
    let consumer = consumer_ctx.get_bundle()?;
    assert_eq!(reference.use_count_for(&consumer), 2);
    assert_eq!(reference.use_count_for(&provider), 1);

    drop(g1);
    assert_eq!(reference.use_count_for(&consumer), 1);
    drop(g2);
    assert_eq!(reference.use_count_for(&consumer), 0);
    drop(g3);
    assert_eq!(reference.use_count_for(&provider), 0);
    Ok(())
}

#[test]
fn test_bundle_scope_one_instance_per_consumer() -> Result<()> {
    let (_dir, fw) = boot()?;
    let (_provider, provider_ctx) = start_bundle(&fw, "test://provider")?;
    let (_c1, ctx1) = start_bundle(&fw, "test://consumer-1")?;
    let (_c2, ctx2) = start_bundle(&fw, "test://consumer-2")?;

    let factory = CountingFactory::new();
    provider_ctx.register_service_factory(
        InterfaceMap::single(IFACE, Arc::new(Counter { serial: 0 })),
        Properties::new(),
        ServiceScope::Bundle,
        factory.clone(),
    )?;

    let r1 = ctx1.get_service_reference(IFACE)?.unwrap();
    let r2 = ctx2.get_service_reference(IFACE)?.unwrap();

    let g1a = ctx1.get_service(&r1)?.unwrap();
    let g1b = ctx1.get_service(&r1)?.unwrap();
    let g2 = ctx2.get_service(&r2)?.unwrap();

    // factory ran once per consumer bundle
    assert_eq!(factory.built.load(Ordering::SeqCst), 2);

    let a = g1a.get::<Counter>(IFACE).unwrap();
    let b = g1b.get::<Counter>(IFACE).unwrap();
    let c = g2.get::<Counter>(IFACE).unwrap();
    assert!(Arc::ptr_eq(&a, &b), "same consumer shares the cached instance");
    assert!(!Arc::ptr_eq(&a, &c), "different consumers get distinct instances");

    // disposal at count zero invokes unget exactly once per instance
    drop(g1a);
    assert_eq!(factory.disposed.load(Ordering::SeqCst), 0);
    drop(g1b);
    assert_eq!(factory.disposed.load(Ordering::SeqCst), 1);
    drop(g2);
    assert_eq!(factory.disposed.load(Ordering::SeqCst), 2);

    // a later acquisition reinvokes the factory fresh
    let g = ctx1.get_service(&r1)?.unwrap();
    assert_eq!(factory.built.load(Ordering::SeqCst), 3);
    drop(g);
    Ok(())
}

#[test]
fn test_prototype_scope_distinct_instances_via_service_objects() -> Result<()> {
    let (_dir, fw) = boot()?;
    let (_provider, provider_ctx) = start_bundle(&fw, "test://provider")?;
    let (consumer, consumer_ctx) = start_bundle(&fw, "test://consumer")?;

    let factory = CountingFactory::new();
    provider_ctx.register_service_factory(
        InterfaceMap::single(IFACE, Arc::new(Counter { serial: 0 })),
        Properties::new(),
        ServiceScope::Prototype,
        factory.clone(),
    )?;

    let reference = consumer_ctx.get_service_reference(IFACE)?.unwrap();
    let objects = consumer_ctx.service_objects(&reference)?;

    let g1 = objects.get_service()?.unwrap();
    let g2 = objects.get_service()?.unwrap();

    assert_eq!(factory.built.load(Ordering::SeqCst), 2);
    assert_eq!(factory.disposed.load(Ordering::SeqCst), 0);

    let s1 = g1.get::<Counter>(IFACE).unwrap();
    let s2 = g2.get::<Counter>(IFACE).unwrap();
    assert!(!Arc::ptr_eq(&s1, &s2), "every acquisition yields a distinct object");
    assert_ne!(s1.serial, s2.serial);
    assert_eq!(reference.prototype_count_for(&consumer), 2);

    drop(g1);
    assert_eq!(factory.disposed.load(Ordering::SeqCst), 1);
    assert_eq!(reference.prototype_count_for(&consumer), 1);
    drop(g2);
    assert_eq!(factory.disposed.load(Ordering::SeqCst), 2);
    assert_eq!(reference.prototype_count_for(&consumer), 0);
    Ok(())
}

#[test]
fn test_factory_error_yields_null_acquisition_and_warning_event() -> Result<()> {
    let (_dir, fw) = boot()?;
    let (_provider, provider_ctx) = start_bundle(&fw, "test://provider")?;
    let (consumer, consumer_ctx) = start_bundle(&fw, "test://consumer")?;

    let warnings = Arc::new(AtomicUsize::new(0));
    let warnings_seen = warnings.clone();
    consumer_ctx.add_framework_listener(Arc::new(move |event| {
        if event.kind == FrameworkEventKind::Warning {
            warnings_seen.fetch_add(1, Ordering::SeqCst);
        }
    }))?;

    provider_ctx.register_service_factory(
        InterfaceMap::single(IFACE, Arc::new(Counter { serial: 0 })),
        Properties::new(),
        ServiceScope::Bundle,
        Arc::new(BrokenFactory { panics: false }),
    )?;

    let reference = consumer_ctx.get_service_reference(IFACE)?.unwrap();
    let guard = consumer_ctx.get_service(&reference)?;
    assert!(guard.is_none(), "failed factory must yield a null acquisition");
    assert_eq!(reference.use_count_for(&consumer), 0, "no use-count charged");
    assert_eq!(warnings.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn test_factory_panic_is_contained() -> Result<()> {
    let (_dir, fw) = boot()?;
    let (_provider, provider_ctx) = start_bundle(&fw, "test://provider")?;
    let (consumer, consumer_ctx) = start_bundle(&fw, "test://consumer")?;

    provider_ctx.register_service_factory(
        InterfaceMap::single(IFACE, Arc::new(Counter { serial: 0 })),
        Properties::new(),
        ServiceScope::Prototype,
        Arc::new(BrokenFactory { panics: true }),
    )?;

    let reference = consumer_ctx.get_service_reference(IFACE)?.unwrap();
    let objects = consumer_ctx.service_objects(&reference)?;
    assert!(objects.get_service()?.is_none());
    assert_eq!(reference.prototype_count_for(&consumer), 0);
    Ok(())
}

#[test]
fn test_factory_map_missing_promised_interface_fails_acquisition() -> Result<()> {
    struct WrongMapFactory;
    impl ServiceFactory for WrongMapFactory {
        fn get_service(
            &self,
            _bundle: &Arc<Bundle>,
            _registration: &ServiceReference,
        ) -> framework::FrameworkResult<InterfaceMap> {
            Ok(InterfaceMap::single("com.veles.Other", Arc::new(Counter { serial: 0 })))
        }
        fn unget_service(
            &self,
            _bundle: Option<&Arc<Bundle>>,
            _registration: &ServiceReference,
            _map: Arc<InterfaceMap>,
        ) {
        }
    }

    let (_dir, fw) = boot()?;
    let (_provider, provider_ctx) = start_bundle(&fw, "test://provider")?;
    let (_consumer, consumer_ctx) = start_bundle(&fw, "test://consumer")?;

    provider_ctx.register_service_factory(
        InterfaceMap::single(IFACE, Arc::new(Counter { serial: 0 })),
        Properties::new(),
        ServiceScope::Bundle,
        Arc::new(WrongMapFactory),
    )?;

    let reference = consumer_ctx.get_service_reference(IFACE)?.unwrap();
    assert!(consumer_ctx.get_service(&reference)?.is_none());
    Ok(())
}

#[test]
fn test_scope_requires_matching_factory() -> Result<()> {
    let (_dir, fw) = boot()?;
    let (_provider, ctx) = start_bundle(&fw, "test://provider")?;

    // non-singleton scope without a factory
    let err = ctx
        .register_service(
            InterfaceMap::single(IFACE, Arc::new(Counter { serial: 0 })),
            Properties::new().with("service.scope", "prototype"),
        )
        .unwrap_err();
    assert!(matches!(err, FrameworkError::InvalidArgument { .. }));

    // unknown scope string
    let err = ctx
        .register_service(
            InterfaceMap::single(IFACE, Arc::new(Counter { serial: 0 })),
            Properties::new().with("service.scope", "global"),
        )
        .unwrap_err();
    assert!(matches!(err, FrameworkError::InvalidArgument { .. }));
    Ok(())
}

#[test]
fn test_plain_get_service_on_prototype_uses_cached_path() -> Result<()> {
    let (_dir, fw) = boot()?;
    let (_provider, provider_ctx) = start_bundle(&fw, "test://provider")?;
    let (_consumer, consumer_ctx) = start_bundle(&fw, "test://consumer")?;

    let factory = CountingFactory::new();
    provider_ctx.register_service_factory(
        InterfaceMap::single(IFACE, Arc::new(Counter { serial: 0 })),
        Properties::new(),
        ServiceScope::Prototype,
        factory.clone(),
    )?;

    let reference = consumer_ctx.get_service_reference(IFACE)?.unwrap();
    let g1 = consumer_ctx.get_service(&reference)?.unwrap();
    let g2 = consumer_ctx.get_service(&reference)?.unwrap();

    // the typed-guard path shares one cached instance per consumer
    assert_eq!(factory.built.load(Ordering::SeqCst), 1);
    let a = g1.get::<Counter>(IFACE).unwrap();
    let b = g2.get::<Counter>(IFACE).unwrap();
    assert!(Arc::ptr_eq(&a, &b));

    drop(g1);
    drop(g2);
    assert_eq!(factory.disposed.load(Ordering::SeqCst), 1);
    Ok(())
}
