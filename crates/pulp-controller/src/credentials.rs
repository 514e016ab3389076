//! Default pull secret provisioning
//!
//! Every namespace hosting a Pulp gets a baseline pull secret. It is
//! created once when missing and never touched again, whoever created it.
//! It carries no owner reference: it is shared by every Pulp in the
//! namespace and must outlive any single one of them.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::{debug, info};

use pulp_common::{Error, CONTROLLER_NAME, DEFAULT_PULL_SECRET_NAME, LABEL_MANAGED_BY};

use crate::client::PulpKubeClient;

/// What [`ensure_default_credential`] did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialOutcome {
    /// The secret was missing and has been created
    Created,
    /// The secret already existed and was left alone
    AlreadyPresent,
}

/// Build the placeholder pull secret for `namespace`
pub fn default_pull_secret(namespace: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(DEFAULT_PULL_SECRET_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                LABEL_MANAGED_BY.to_string(),
                CONTROLLER_NAME.to_string(),
            )])),
            ..Default::default()
        },
        string_data: Some(BTreeMap::from([(
            "operator".to_string(),
            "pulp".to_string(),
        )])),
        ..Default::default()
    }
}

/// Make sure the default pull secret exists in `namespace`.
///
/// Issues at most one create, and only when the secret is absent. Lookup
/// failures other than not-found propagate so the caller retries later.
pub async fn ensure_default_credential(
    kube: &dyn PulpKubeClient,
    namespace: &str,
) -> Result<CredentialOutcome, Error> {
    if kube
        .get_secret(namespace, DEFAULT_PULL_SECRET_NAME)
        .await?
        .is_some()
    {
        debug!(namespace, "default pull secret already present");
        return Ok(CredentialOutcome::AlreadyPresent);
    }

    let secret = default_pull_secret(namespace);
    if kube.create_secret(namespace, &secret).await? {
        info!(namespace, secret = DEFAULT_PULL_SECRET_NAME, "created default pull secret");
        Ok(CredentialOutcome::Created)
    } else {
        Ok(CredentialOutcome::AlreadyPresent)
    }
}
