//! Common testing utilities for the VELES workspace
//!
//! Provides small fixtures shared by the unit tests of this crate.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::config_base::FrameworkConfig;

/// Config pointed at a unique temp subdirectory so parallel tests never
/// collide on a storage root.
pub fn isolated_test_config(tag: &str) -> FrameworkConfig {
    let root = unique_temp_root(tag);
    FrameworkConfig::testing().with_storage_root(root)
}

pub fn unique_temp_root(tag: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    std::env::temp_dir().join(format!("veles-test-{tag}-{nanos}"))
}

pub fn sample_properties() -> BTreeMap<String, serde_json::Value> {
    let mut props = BTreeMap::new();
    props.insert("org.veles.vendor".to_string(), "veles".into());
    props.insert("org.veles.boot.ts".to_string(), 0i64.into());
    props
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolated_roots_are_unique() {
        let a = unique_temp_root("a");
        let b = unique_temp_root("a");
        // nanos differ between calls on every platform we target
        assert_ne!(a, b);
    }
}
