//! Storage backend resolution
//!
//! Each logical resource (the shared Pulp file store, the cache, the
//! database) can be backed by one of several independent optional spec
//! blocks. At most one of them may be non-empty; none means an ephemeral
//! `emptyDir` default.

use super::pulp::PulpSpec;
use crate::Error;

/// Logical resource that needs storage
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageResource {
    /// Shared artifact storage for api/content/worker
    Pulp,
    /// Cache backend
    Cache,
    /// Managed database volume
    Database,
}

impl StorageResource {
    /// Every resource, in the order they are checked
    pub const ALL: [StorageResource; 3] = [
        StorageResource::Pulp,
        StorageResource::Cache,
        StorageResource::Database,
    ];
}

impl std::fmt::Display for StorageResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pulp => write!(f, "Pulp"),
            Self::Cache => write!(f, "Cache"),
            Self::Database => write!(f, "Database"),
        }
    }
}

/// Backend chosen for one logical resource
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    /// Nothing configured: ephemeral storage
    Ephemeral,
    /// The spec field that configures the backend
    Configured(&'static str),
}

/// Resolution result for one logical resource
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StorageSelection {
    /// Which logical resource
    pub resource: StorageResource,
    /// Which backend serves it
    pub backend: StorageBackend,
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.is_empty())
}

impl PulpSpec {
    /// Names of the backend blocks that are non-empty for `resource`
    pub fn configured_backends(&self, resource: StorageResource) -> Vec<&'static str> {
        let candidates: Vec<(&'static str, bool)> = match resource {
            StorageResource::Pulp => vec![
                ("objectStorageS3Secret", non_empty(&self.object_storage_s3_secret)),
                (
                    "objectStorageAzureSecret",
                    non_empty(&self.object_storage_azure_secret),
                ),
                ("fileStorageClass", non_empty(&self.file_storage_class)),
                ("pvc", non_empty(&self.pvc)),
            ],
            StorageResource::Cache => {
                let cache = self.cache.as_ref();
                let redis = cache.and_then(|c| c.redis.as_ref());
                let redis_class = redis.is_some_and(|r| non_empty(&r.storage_class));
                let redis_pvc = redis.is_some_and(|r| non_empty(&r.pvc));
                vec![
                    // a redis block without a volume source still selects redis
                    (
                        "redis",
                        redis.is_some_and(|r| !r.is_empty()) && !redis_class && !redis_pvc,
                    ),
                    ("redis.storageClass", redis_class),
                    ("redis.pvc", redis_pvc),
                    (
                        "memcached",
                        cache
                            .and_then(|c| c.memcached.as_ref())
                            .is_some_and(|m| !m.is_empty()),
                    ),
                    (
                        "externalCacheSecret",
                        cache.is_some_and(|c| non_empty(&c.external_cache_secret)),
                    ),
                ]
            }
            StorageResource::Database => {
                let managed = self.database.as_ref().and_then(|d| d.managed.as_ref());
                vec![
                    ("database.managed.pvc", managed.is_some_and(|m| non_empty(&m.pvc))),
                    (
                        "database.managed.storageClass",
                        managed.is_some_and(|m| non_empty(&m.storage_class)),
                    ),
                ]
            }
        };

        candidates
            .into_iter()
            .filter_map(|(name, set)| set.then_some(name))
            .collect()
    }

    /// Resolve the backend of every logical resource.
    ///
    /// Fails with [`Error::MultipleStorageBackends`] naming the first resource
    /// with more than one backend configured.
    pub fn resolve_storage(&self, pulp: &str) -> Result<Vec<StorageSelection>, Error> {
        StorageResource::ALL
            .into_iter()
            .map(|resource| {
                let configured = self.configured_backends(resource);
                let backend = match configured.as_slice() {
                    [] => StorageBackend::Ephemeral,
                    [only] => StorageBackend::Configured(*only),
                    _ => {
                        return Err(Error::MultipleStorageBackends {
                            pulp: pulp.to_string(),
                            resource,
                            kinds: configured.iter().map(|k| k.to_string()).collect(),
                        })
                    }
                };
                Ok(StorageSelection { resource, backend })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        CacheSpec, DatabaseSpec, ManagedDatabaseSpec, MemcachedCacheSpec, RedisCacheSpec,
    };

    fn redis() -> RedisCacheSpec {
        RedisCacheSpec {
            storage_class: Some("standard".to_string()),
            ..Default::default()
        }
    }

    fn memcached() -> MemcachedCacheSpec {
        MemcachedCacheSpec {
            memory_limit_mb: Some(64),
            ..Default::default()
        }
    }

    #[test]
    fn nothing_configured_is_ephemeral_everywhere() {
        let selections = PulpSpec::default().resolve_storage("galaxy").unwrap();
        assert_eq!(selections.len(), 3);
        assert!(selections
            .iter()
            .all(|s| s.backend == StorageBackend::Ephemeral));
    }

    #[test]
    fn single_backend_is_selected() {
        let spec = PulpSpec {
            object_storage_s3_secret: Some("s3-creds".to_string()),
            ..Default::default()
        };
        let selections = spec.resolve_storage("galaxy").unwrap();
        assert_eq!(
            selections[0],
            StorageSelection {
                resource: StorageResource::Pulp,
                backend: StorageBackend::Configured("objectStorageS3Secret"),
            }
        );
    }

    #[test]
    fn empty_strings_do_not_count() {
        let spec = PulpSpec {
            pvc: Some(String::new()),
            file_storage_class: Some("standard".to_string()),
            ..Default::default()
        };
        assert_eq!(
            spec.configured_backends(StorageResource::Pulp),
            vec!["fileStorageClass"]
        );
    }

    #[test]
    fn empty_blocks_do_not_count() {
        let spec = PulpSpec {
            cache: Some(CacheSpec {
                redis: Some(RedisCacheSpec::default()),
                memcached: Some(memcached()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(spec.resolve_storage("galaxy").is_ok());
    }

    #[test]
    fn redis_and_memcached_together_fail_for_cache() {
        let spec = PulpSpec {
            cache: Some(CacheSpec {
                redis: Some(redis()),
                memcached: Some(memcached()),
                ..Default::default()
            }),
            ..Default::default()
        };
        match spec.resolve_storage("galaxy").unwrap_err() {
            Error::MultipleStorageBackends {
                resource, kinds, ..
            } => {
                assert_eq!(resource, StorageResource::Cache);
                assert_eq!(kinds, vec!["redis.storageClass", "memcached"]);
            }
            other => panic!("Expected MultipleStorageBackends, got {other:?}"),
        }
    }

    #[test]
    fn every_pair_of_primary_backends_fails() {
        let set = |i: usize, j: usize| {
            let mut fields: [Option<String>; 4] = Default::default();
            fields[i] = Some("a".to_string());
            fields[j] = Some("b".to_string());
            let [s3, azure, class, pvc] = fields;
            PulpSpec {
                object_storage_s3_secret: s3,
                object_storage_azure_secret: azure,
                file_storage_class: class,
                pvc,
                ..Default::default()
            }
        };
        for i in 0..4 {
            for j in (i + 1)..4 {
                let err = set(i, j).resolve_storage("galaxy").unwrap_err();
                assert!(
                    matches!(
                        err,
                        Error::MultipleStorageBackends {
                            resource: StorageResource::Pulp,
                            ..
                        }
                    ),
                    "pair ({i}, {j}) should be rejected"
                );
            }
        }
    }

    #[test]
    fn database_pvc_and_storage_class_conflict() {
        let spec = PulpSpec {
            database: Some(DatabaseSpec {
                managed: Some(ManagedDatabaseSpec {
                    pvc: Some("pg-data".to_string()),
                    storage_class: Some("fast".to_string()),
                    version: None,
                }),
                external: None,
            }),
            ..Default::default()
        };
        let err = spec.resolve_storage("galaxy").unwrap_err();
        assert!(matches!(
            err,
            Error::MultipleStorageBackends {
                resource: StorageResource::Database,
                ..
            }
        ));
    }

    #[test]
    fn external_cache_counts_as_backend() {
        let spec = PulpSpec {
            cache: Some(CacheSpec {
                redis: Some(redis()),
                external_cache_secret: Some("elasticache".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(
            spec.configured_backends(StorageResource::Cache),
            vec!["redis.storageClass", "externalCacheSecret"]
        );
    }

    #[test]
    fn redis_storage_class_and_pvc_conflict() {
        let spec = PulpSpec {
            cache: Some(CacheSpec {
                redis: Some(RedisCacheSpec {
                    storage_class: Some("standard".to_string()),
                    pvc: Some("redis-data".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        match spec.resolve_storage("galaxy").unwrap_err() {
            Error::MultipleStorageBackends {
                resource, kinds, ..
            } => {
                assert_eq!(resource, StorageResource::Cache);
                assert_eq!(kinds, vec!["redis.storageClass", "redis.pvc"]);
            }
            other => panic!("Expected MultipleStorageBackends, got {other:?}"),
        }
    }

    #[test]
    fn redis_without_volume_source_is_one_backend() {
        let spec = PulpSpec {
            cache: Some(CacheSpec {
                redis: Some(RedisCacheSpec {
                    image: Some("redis:7".to_string()),
                    ..Default::default()
                }),
                memcached: Some(memcached()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(
            spec.configured_backends(StorageResource::Cache),
            vec!["redis", "memcached"]
        );
    }
}
