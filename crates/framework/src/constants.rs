//! Canonical property keys and scope names used across the framework.

/// Framework-assigned unique registration id (u64, monotone process-wide).
pub const SERVICE_ID: &str = "service.id";

/// Registrar-supplied selection ranking (i64, default 0).
pub const SERVICE_RANKING: &str = "service.ranking";

/// Registration scope: one of `SCOPE_SINGLETON`, `SCOPE_BUNDLE`, `SCOPE_PROTOTYPE`.
pub const SERVICE_SCOPE: &str = "service.scope";

/// Ordered list of interface names the registration satisfies.
pub const OBJECT_CLASS: &str = "objectClass";

/// Prefix of reserved property keys.
pub const RESERVED_PREFIX: &str = "service.";

pub const SCOPE_SINGLETON: &str = "singleton";
pub const SCOPE_BUNDLE: &str = "bundle";
pub const SCOPE_PROTOTYPE: &str = "prototype";
