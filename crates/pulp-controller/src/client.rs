//! Kubernetes API access for the Pulp controller
//!
//! Every cluster read and write the loop performs goes through
//! [`PulpKubeClient`] so reconciliation can be driven by mocks in tests.
//! Not-found is surfaced as `None`; optimistic concurrency conflicts as
//! [`Error::Conflict`].

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DynamicObject, GroupVersionKind, PostParams};
use kube::discovery::ApiResource;
use kube::{Client, ResourceExt};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use pulp_common::crd::{Pulp, PulpStatus};
use pulp_common::{Error, CONTROLLER_NAME};

/// API group serving OpenShift Routes
pub const ROUTE_GROUP: &str = "route.openshift.io";

/// Trait abstracting Kubernetes client operations for the Pulp controller
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PulpKubeClient: Send + Sync {
    /// Get a Pulp by namespace and name
    async fn get_pulp(&self, namespace: &str, name: &str) -> Result<Option<Pulp>, Error>;

    /// Get a Secret by namespace and name
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;

    /// Create a Secret
    ///
    /// Returns `false` when a Secret with the same name already exists.
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<bool, Error>;

    /// Replace the status of a Pulp
    ///
    /// Uses the `resourceVersion` of `pulp`, so a concurrent writer makes
    /// this fail with [`Error::Conflict`].
    async fn replace_pulp_status(&self, pulp: &Pulp, status: &PulpStatus) -> Result<(), Error>;

    /// Get a Deployment by namespace and name
    async fn get_deployment(&self, namespace: &str, name: &str)
        -> Result<Option<Deployment>, Error>;

    /// Get a StatefulSet by namespace and name
    async fn get_stateful_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<StatefulSet>, Error>;

    /// Get an OpenShift Route by namespace and name
    async fn get_route(&self, namespace: &str, name: &str)
        -> Result<Option<DynamicObject>, Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PulpKubeClient for KubeClientImpl {
    async fn get_pulp(&self, namespace: &str, name: &str) -> Result<Option<Pulp>, Error> {
        let api: Api<Pulp> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<bool, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let params = PostParams {
            field_manager: Some(CONTROLLER_NAME.to_string()),
            ..Default::default()
        };
        match api.create(&params, secret).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                debug!(secret = %secret.name_any(), "secret created concurrently");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn replace_pulp_status(&self, pulp: &Pulp, status: &PulpStatus) -> Result<(), Error> {
        let name = pulp.name_any();
        let namespace = pulp
            .namespace()
            .ok_or_else(|| Error::internal_with_context("status", "Pulp has no namespace"))?;
        let api: Api<Pulp> = Api::namespaced(self.client.clone(), &namespace);

        let mut updated = pulp.clone();
        updated.status = Some(status.clone());
        let data = serde_json::to_vec(&updated)
            .map_err(|e| Error::serialization_for_kind("Pulp", e.to_string()))?;

        let params = PostParams {
            field_manager: Some(CONTROLLER_NAME.to_string()),
            ..Default::default()
        };
        match api.replace_status(&name, &params, data).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Err(Error::conflict("Pulp", name)),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_stateful_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<StatefulSet>, Error> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_route(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error> {
        let gvk = GroupVersionKind::gvk(ROUTE_GROUP, "v1", "Route");
        let ar = ApiResource::from_gvk(&gvk);
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &ar);
        Ok(api.get_opt(name).await?)
    }
}
