//! Pulp CRD: the declared topology of one Pulp installation
//!
//! Storage and database configuration is expressed as independent optional
//! blocks so older manifests keep deserializing as the schema grows. The
//! "exactly one of" rules the schema cannot express are recovered by
//! [`PulpSpec::validate_preconditions`] and the storage resolver.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;
use crate::Error;

/// Ingress mode that selects the OpenShift Route tier
pub const ROUTE_INGRESS: &str = "route";

/// Pulp defines a content-management deployment and how it is exposed.
///
/// Example:
/// ```yaml
/// apiVersion: repo-manager.pulpproject.org/v1alpha1
/// kind: Pulp
/// metadata:
///   name: galaxy
///   namespace: pulp
/// spec:
///   ingressType: nodeport
///   imageVersion: "3.49"
///   imageWebVersion: "3.49"
///   fileStorageClass: standard
///   database:
///     external:
///       secretName: galaxy-postgres
///   cache:
///     redis:
///       storageClass: standard
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "repo-manager.pulpproject.org",
    version = "v1alpha1",
    kind = "Pulp",
    namespaced,
    status = "PulpStatus",
    printcolumn = r#"{"name":"Ingress","type":"string","jsonPath":".spec.ingressType"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PulpSpec {
    /// How the web tier is exposed. `route` (any case) uses an OpenShift Route,
    /// anything else runs the web (reverse proxy) tier.
    #[serde(default)]
    pub ingress_type: String,

    /// Image tag for the api, content and worker tiers
    #[serde(default)]
    pub image_version: String,

    /// Image tag for the web tier
    #[serde(default)]
    pub image_web_version: String,

    /// Database configuration. Absent means a managed database with defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseSpec>,

    /// Cache configuration. Absent means a managed Redis with ephemeral storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheSpec>,

    /// Secret holding S3 object storage credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_storage_s3_secret: Option<String>,

    /// Secret holding Azure blob storage credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_storage_azure_secret: Option<String>,

    /// StorageClass used to provision the shared file storage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_storage_class: Option<String>,

    /// Pre-existing PersistentVolumeClaim for the shared file storage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pvc: Option<String>,
}

/// Database configuration blocks.
///
/// `managed` and `external` are mutually exclusive; read them through
/// [`PulpSpec::database_mode`].
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSpec {
    /// Operator-managed PostgreSQL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed: Option<ManagedDatabaseSpec>,

    /// Externally operated PostgreSQL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<ExternalDatabaseSpec>,
}

/// Operator-managed PostgreSQL settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedDatabaseSpec {
    /// Pre-existing PersistentVolumeClaim for the database
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pvc: Option<String>,

    /// StorageClass used to provision the database volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,

    /// PostgreSQL major version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Reference to an externally operated PostgreSQL
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalDatabaseSpec {
    /// Secret holding host, port, database name and credentials
    pub secret_name: String,
}

/// Cache configuration blocks. At most one backend may be set.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheSpec {
    /// Whether the content tiers use a cache at all
    #[serde(default = "super::default_true")]
    pub enabled: bool,

    /// Operator-managed Redis
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisCacheSpec>,

    /// Operator-managed Memcached
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memcached: Option<MemcachedCacheSpec>,

    /// Secret pointing at an externally operated cache
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_cache_secret: Option<String>,
}

impl Default for CacheSpec {
    fn default() -> Self {
        Self {
            enabled: true,
            redis: None,
            memcached: None,
            external_cache_secret: None,
        }
    }
}

/// Redis cache settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RedisCacheSpec {
    /// Redis image override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// StorageClass for the Redis volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,

    /// Pre-existing PersistentVolumeClaim for Redis
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pvc: Option<String>,
}

impl RedisCacheSpec {
    /// True when no field of the block is set
    pub fn is_empty(&self) -> bool {
        self.image.is_none() && self.storage_class.is_none() && self.pvc.is_none()
    }
}

/// Memcached cache settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemcachedCacheSpec {
    /// Memcached image override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Memory limit in megabytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit_mb: Option<u32>,
}

impl MemcachedCacheSpec {
    /// True when no field of the block is set
    pub fn is_empty(&self) -> bool {
        self.image.is_none() && self.memory_limit_mb.is_none()
    }
}

/// How the database tier is provided
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DatabaseMode<'a> {
    /// No database block: managed PostgreSQL with defaults
    Unset,
    /// Operator-managed PostgreSQL with explicit settings
    ManagedInternal(&'a ManagedDatabaseSpec),
    /// Externally operated PostgreSQL; the database tier is skipped
    External(&'a ExternalDatabaseSpec),
}

impl DatabaseMode<'_> {
    /// Whether the operator runs the database tier
    pub fn is_managed(&self) -> bool {
        !matches!(self, DatabaseMode::External(_))
    }
}

impl PulpSpec {
    /// Whether the declared ingress mode is `route` (case-insensitive)
    pub fn is_route_ingress(&self) -> bool {
        self.ingress_type.eq_ignore_ascii_case(ROUTE_INGRESS)
    }

    /// Resolve the database blocks into a single mode.
    ///
    /// An external reference wins when both blocks are present; that case is
    /// rejected by [`PulpSpec::validate_preconditions`] before any phase runs.
    pub fn database_mode(&self) -> DatabaseMode<'_> {
        match &self.database {
            Some(DatabaseSpec {
                external: Some(ext),
                ..
            }) => DatabaseMode::External(ext),
            Some(DatabaseSpec {
                managed: Some(managed),
                ..
            }) => DatabaseMode::ManagedInternal(managed),
            _ => DatabaseMode::Unset,
        }
    }

    /// Check cross-field invariants before anything is written to the cluster.
    ///
    /// Rules:
    /// - unless ingress is `route`, `imageVersion` must equal `imageWebVersion`
    /// - `route` ingress needs an OpenShift cluster to serve Routes
    /// - `database.managed` and `database.external` are mutually exclusive and
    ///   an external reference must name its secret
    pub fn validate_preconditions(&self, pulp: &str, is_openshift: bool) -> Result<(), Error> {
        if !self.is_route_ingress() && self.image_version != self.image_web_version {
            return Err(Error::version_mismatch(
                pulp,
                &self.image_version,
                &self.image_web_version,
            ));
        }

        if self.is_route_ingress() && !is_openshift {
            return Err(Error::validation_for_field(
                pulp,
                "spec.ingressType",
                "ingressType route requires an OpenShift cluster",
            ));
        }

        if let Some(db) = &self.database {
            if db.managed.is_some() && db.external.is_some() {
                return Err(Error::validation_for_field(
                    pulp,
                    "spec.database",
                    "database.managed and database.external are mutually exclusive",
                ));
            }
            if let Some(ext) = &db.external {
                if ext.secret_name.is_empty() {
                    return Err(Error::validation_for_field(
                        pulp,
                        "spec.database.external.secretName",
                        "external database secret name must not be empty",
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Overall lifecycle phase reported in `status.phase`
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum PulpPhase {
    /// Not yet converged
    #[default]
    Pending,
    /// Every tier that ran reported ready
    Ready,
    /// The desired state is invalid
    Failed,
}

impl std::fmt::Display for PulpPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Ready => write!(f, "Ready"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Observed state of a Pulp, written only by the status phase
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PulpStatus {
    /// Current phase
    #[serde(default)]
    pub phase: PulpPhase,

    /// Human-readable summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Tiers that converged in the invocation that wrote this status
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tiers: Vec<String>,

    /// Per-tier and overall readiness conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Generation of the spec this status describes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl PulpStatus {
    /// Whether `other` says the same thing, ignoring condition timestamps
    pub fn same_summary(&self, other: &PulpStatus) -> bool {
        self.phase == other.phase
            && self.message == other.message
            && self.tiers == other.tiers
            && self.observed_generation == other.observed_generation
    }
}
