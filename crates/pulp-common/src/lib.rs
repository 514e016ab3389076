//! Common types for the Pulp operator: CRDs, errors, and event recording

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;

pub use error::Error;

/// Field manager / reporting component name used for API writes and Events
pub const CONTROLLER_NAME: &str = "pulp-operator";

/// Name of the baseline pull secret provisioned in every namespace hosting a Pulp
pub const DEFAULT_PULL_SECRET_NAME: &str = "redhat-operators-pull-secret";

/// Label key identifying the operator that manages a resource
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
