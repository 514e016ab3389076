//! Custom Resource Definitions for the Pulp operator

mod pulp;
mod storage;
mod types;

pub use pulp::{
    CacheSpec, DatabaseMode, DatabaseSpec, ExternalDatabaseSpec, ManagedDatabaseSpec,
    MemcachedCacheSpec, Pulp, PulpPhase, PulpSpec, PulpStatus, RedisCacheSpec, ROUTE_INGRESS,
};
pub use storage::{StorageBackend, StorageResource, StorageSelection};
pub use types::{Condition, ConditionStatus};

/// Serde default helper returning `true`
pub(crate) fn default_true() -> bool {
    true
}
