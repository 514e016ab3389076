//! Error types for the Pulp operator
//!
//! Errors carry the name of the Pulp they concern plus whatever field or
//! backend information helps an operator fix the resource. Validation
//! errors never clear on their own; everything else is expected to heal on
//! a later reconcile.

use std::time::Duration;

use thiserror::Error;

use crate::crd::StorageResource;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Pulp operator operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Web and API images disagree while the web tier is in use
    #[error(
        "version mismatch for {pulp}: imageVersion {image_version} must equal imageWebVersion {image_web_version} unless ingressType is route"
    )]
    VersionMismatch {
        /// Name of the offending Pulp
        pulp: String,
        /// Declared `spec.imageVersion`
        image_version: String,
        /// Declared `spec.imageWebVersion`
        image_web_version: String,
    },

    /// More than one storage backend configured for one logical resource
    #[error("found more than one storage type ({}) for {resource} in {pulp}", kinds.join(", "))]
    MultipleStorageBackends {
        /// Name of the offending Pulp
        pulp: String,
        /// Logical resource with ambiguous storage
        resource: StorageResource,
        /// Spec fields that were all set
        kinds: Vec<String>,
    },

    /// Any other invalid desired state
    #[error("validation error for {pulp}: {message}")]
    Validation {
        /// Name of the offending Pulp
        pulp: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.database.external")
        field: Option<String>,
    },

    /// Optimistic concurrency conflict on a write
    #[error("conflict writing {kind} {name}")]
    Conflict {
        /// Kind of the object being written
        kind: String,
        /// Name of the object being written
        name: String,
    },

    /// Reconciliation ran past its deadline
    #[error("reconcile of {pulp} exceeded its deadline of {after:?}")]
    Timeout {
        /// Name of the Pulp being reconciled
        pulp: String,
        /// Configured deadline
        after: Duration,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "status")
        context: String,
    },
}

impl Error {
    /// Create a version mismatch error
    pub fn version_mismatch(
        pulp: impl Into<String>,
        image_version: impl Into<String>,
        image_web_version: impl Into<String>,
    ) -> Self {
        Self::VersionMismatch {
            pulp: pulp.into(),
            image_version: image_version.into(),
            image_web_version: image_web_version.into(),
        }
    }

    /// Create a validation error with Pulp context and field path
    pub fn validation_for_field(
        pulp: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            pulp: pulp.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a conflict error for the given object
    pub fn conflict(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Whether this error stems from the desired state itself.
    ///
    /// These only clear once the Pulp spec is edited.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::VersionMismatch { .. }
                | Error::MultipleStorageBackends { .. }
                | Error::Validation { .. }
        )
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::VersionMismatch { .. }
            | Error::MultipleStorageBackends { .. }
            | Error::Validation { .. } => false,
            Error::Conflict { .. } => true,
            Error::Timeout { .. } => true,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_mismatch_names_both_versions() {
        let err = Error::version_mismatch("galaxy", "3.28", "3.29");
        let msg = err.to_string();
        assert!(msg.contains("galaxy"));
        assert!(msg.contains("3.28"));
        assert!(msg.contains("3.29"));
        assert!(err.is_validation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn multiple_storage_lists_offending_fields() {
        let err = Error::MultipleStorageBackends {
            pulp: "galaxy".to_string(),
            resource: StorageResource::Cache,
            kinds: vec!["redis".to_string(), "memcached".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("redis, memcached"));
        assert!(msg.contains("Cache"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn validation_carries_field_path() {
        let err = Error::validation_for_field("galaxy", "spec.database.external", "empty");
        match &err {
            Error::Validation { field, .. } => {
                assert_eq!(field.as_deref(), Some("spec.database.external"))
            }
            _ => panic!("Expected Validation variant"),
        }
        assert!(err.is_validation());
    }

    #[test]
    fn conflicts_and_timeouts_are_transient() {
        assert!(Error::conflict("Pulp", "galaxy").is_retryable());
        let timeout = Error::Timeout {
            pulp: "galaxy".to_string(),
            after: Duration::from_secs(120),
        };
        assert!(timeout.is_retryable());
        assert!(!timeout.is_validation());
    }

    #[test]
    fn serialization_errors_are_permanent() {
        let err = Error::serialization_for_kind("PulpStatus", "bad float");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("serialization error"));
    }

    #[test]
    fn internal_errors_keep_context() {
        let err = Error::internal_with_context("status", "missing resourceVersion");
        assert!(err.to_string().contains("[status]"));
        assert!(Error::internal("boom").to_string().contains(UNKNOWN_CONTEXT));
    }
}
