//! Cluster platform detection

use async_trait::async_trait;
use kube::Client;

#[cfg(test)]
use mockall::automock;

use pulp_common::Error;

/// API group only served by OpenShift clusters
pub const OPENSHIFT_CONFIG_GROUP: &str = "config.openshift.io";

/// Answers whether the cluster is OpenShift, which decides if Routes are available.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PlatformDetector: Send + Sync {
    /// Whether the cluster serves the OpenShift config API group
    async fn is_openshift(&self) -> Result<bool, Error>;
}

/// Detects OpenShift by listing the API groups the server advertises
pub struct ApiGroupDetector {
    client: Client,
}

impl ApiGroupDetector {
    /// Create a detector using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PlatformDetector for ApiGroupDetector {
    async fn is_openshift(&self) -> Result<bool, Error> {
        let groups = self.client.list_api_groups().await?;
        Ok(groups
            .groups
            .iter()
            .any(|g| g.name == OPENSHIFT_CONFIG_GROUP))
    }
}

/// Fixed answer, for clusters where discovery is restricted
pub struct StaticPlatform(pub bool);

#[async_trait]
impl PlatformDetector for StaticPlatform {
    async fn is_openshift(&self) -> Result<bool, Error> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_platform_reports_its_value() {
        assert!(StaticPlatform(true).is_openshift().await.unwrap());
        assert!(!StaticPlatform(false).is_openshift().await.unwrap());
    }
}
