//! Readiness observers for the workloads behind each tier.
//!
//! Workload objects are named `<pulp>-<suffix>` by the tier builders. These
//! phases never write; they report `Continue` once the workload has rolled
//! out and `RequeueAfter(poll_interval)` otherwise.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use kube::api::DynamicObject;
use tracing::debug;

use pulp_common::crd::Pulp;
use pulp_common::Error;

use super::{pulp_identity, Phase, PhaseContext, PhaseOutcome, PhaseResult, Tier};
use crate::client::PulpKubeClient;

/// Kind of workload a tier runs as
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkloadKind {
    /// apps/v1 Deployment
    Deployment,
    /// apps/v1 StatefulSet
    StatefulSet,
}

/// Rollout counters shared by Deployments and StatefulSets
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Rollout {
    desired: i32,
    ready: i32,
    generation: Option<i64>,
    observed_generation: Option<i64>,
}

impl Rollout {
    fn is_ready(&self) -> bool {
        let caught_up = match (self.generation, self.observed_generation) {
            (Some(generation), Some(observed)) => observed >= generation,
            (Some(_), None) => false,
            (None, _) => true,
        };
        caught_up && self.ready >= self.desired
    }
}

impl From<&Deployment> for Rollout {
    fn from(deploy: &Deployment) -> Self {
        let status = deploy.status.as_ref();
        Self {
            desired: deploy.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1),
            ready: status.and_then(|s| s.ready_replicas).unwrap_or(0),
            generation: deploy.metadata.generation,
            observed_generation: status.and_then(|s| s.observed_generation),
        }
    }
}

impl From<&StatefulSet> for Rollout {
    fn from(sts: &StatefulSet) -> Self {
        let status = sts.status.as_ref();
        Self {
            desired: sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1),
            ready: status.and_then(|s| s.ready_replicas).unwrap_or(0),
            generation: sts.metadata.generation,
            observed_generation: status.and_then(|s| s.observed_generation),
        }
    }
}

async fn workload_ready(
    kube: &dyn PulpKubeClient,
    kind: WorkloadKind,
    namespace: &str,
    name: &str,
) -> Result<bool, Error> {
    let rollout = match kind {
        WorkloadKind::Deployment => kube
            .get_deployment(namespace, name)
            .await?
            .as_ref()
            .map(Rollout::from),
        WorkloadKind::StatefulSet => kube
            .get_stateful_set(namespace, name)
            .await?
            .as_ref()
            .map(Rollout::from),
    };

    match rollout {
        None => {
            debug!(namespace, workload = name, ?kind, "workload not found");
            Ok(false)
        }
        Some(r) if !r.is_ready() => {
            debug!(
                namespace,
                workload = name,
                ready = r.ready,
                desired = r.desired,
                "workload still rolling out"
            );
            Ok(false)
        }
        Some(_) => Ok(true),
    }
}

/// Waits for `<pulp>-<suffix>` to be rolled out
pub struct WorkloadReadiness {
    tier: Tier,
    kind: WorkloadKind,
    suffix: &'static str,
    kube: Arc<dyn PulpKubeClient>,
    poll_interval: Duration,
}

impl WorkloadReadiness {
    /// Observer for the `kind` workload named `<pulp>-<suffix>`
    pub fn new(
        tier: Tier,
        kind: WorkloadKind,
        suffix: &'static str,
        kube: Arc<dyn PulpKubeClient>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            tier,
            kind,
            suffix,
            kube,
            poll_interval,
        }
    }
}

#[async_trait]
impl Phase for WorkloadReadiness {
    fn tier(&self) -> Tier {
        self.tier
    }

    async fn reconcile(&self, ctx: &PhaseContext<'_>, pulp: &Pulp) -> PhaseResult {
        let (namespace, name) = pulp_identity(pulp)?;
        let workload = format!("{name}-{}", self.suffix);
        let ready = ctx
            .within(
                pulp,
                workload_ready(self.kube.as_ref(), self.kind, &namespace, &workload),
            )
            .await?;
        if ready {
            Ok(PhaseOutcome::Continue)
        } else {
            Ok(PhaseOutcome::RequeueAfter(self.poll_interval))
        }
    }
}

/// Cache tier: waits for the managed Redis or Memcached Deployment.
///
/// Nothing to wait for when caching is disabled or an external cache is used.
pub struct CachePhase {
    kube: Arc<dyn PulpKubeClient>,
    poll_interval: Duration,
}

impl CachePhase {
    /// Create the cache observer
    pub fn new(kube: Arc<dyn PulpKubeClient>, poll_interval: Duration) -> Self {
        Self {
            kube,
            poll_interval,
        }
    }

    /// Workload suffix for the cache backend, or None when nothing is managed
    fn managed_suffix(pulp: &Pulp) -> Option<&'static str> {
        let Some(cache) = pulp.spec.cache.as_ref() else {
            return Some("redis");
        };
        if !cache.enabled {
            return None;
        }
        if cache
            .external_cache_secret
            .as_deref()
            .is_some_and(|s| !s.is_empty())
        {
            return None;
        }
        if cache.memcached.as_ref().is_some_and(|m| !m.is_empty()) {
            Some("memcached")
        } else {
            Some("redis")
        }
    }
}

#[async_trait]
impl Phase for CachePhase {
    fn tier(&self) -> Tier {
        Tier::Cache
    }

    async fn reconcile(&self, ctx: &PhaseContext<'_>, pulp: &Pulp) -> PhaseResult {
        let Some(suffix) = Self::managed_suffix(pulp) else {
            return Ok(PhaseOutcome::Continue);
        };
        let (namespace, name) = pulp_identity(pulp)?;
        let workload = format!("{name}-{suffix}");
        let ready = ctx
            .within(
                pulp,
                workload_ready(
                    self.kube.as_ref(),
                    WorkloadKind::Deployment,
                    &namespace,
                    &workload,
                ),
            )
            .await?;
        if ready {
            Ok(PhaseOutcome::Continue)
        } else {
            Ok(PhaseOutcome::RequeueAfter(self.poll_interval))
        }
    }
}

/// Route tier: waits for the Route named after the Pulp to be admitted
pub struct RoutePhase {
    kube: Arc<dyn PulpKubeClient>,
    poll_interval: Duration,
}

impl RoutePhase {
    /// Create the route observer
    pub fn new(kube: Arc<dyn PulpKubeClient>, poll_interval: Duration) -> Self {
        Self {
            kube,
            poll_interval,
        }
    }
}

/// Whether any router has admitted the Route
fn route_admitted(route: &DynamicObject) -> bool {
    let Some(ingress) = route
        .data
        .pointer("/status/ingress")
        .and_then(|v| v.as_array())
    else {
        return false;
    };
    ingress.iter().any(|entry| {
        entry
            .get("conditions")
            .and_then(|c| c.as_array())
            .is_some_and(|conditions| {
                conditions.iter().any(|c| {
                    c.get("type").and_then(|t| t.as_str()) == Some("Admitted")
                        && c.get("status").and_then(|s| s.as_str()) == Some("True")
                })
            })
    })
}

#[async_trait]
impl Phase for RoutePhase {
    fn tier(&self) -> Tier {
        Tier::Route
    }

    async fn reconcile(&self, ctx: &PhaseContext<'_>, pulp: &Pulp) -> PhaseResult {
        let (namespace, name) = pulp_identity(pulp)?;
        match ctx
            .within(pulp, self.kube.get_route(&namespace, &name))
            .await?
        {
            Some(route) if route_admitted(&route) => Ok(PhaseOutcome::Continue),
            Some(_) => {
                debug!(namespace, route = %name, "route not admitted yet");
                Ok(PhaseOutcome::RequeueAfter(self.poll_interval))
            }
            None => {
                debug!(namespace, route = %name, "route not found");
                Ok(PhaseOutcome::RequeueAfter(self.poll_interval))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockPulpKubeClient;
    use crate::phases::tests::sample_pulp;
    use k8s_openapi::api::apps::v1::{DeploymentSpec, DeploymentStatus, StatefulSetStatus};
    use kube::api::ApiResource;
    use pulp_common::crd::{CacheSpec, MemcachedCacheSpec, PulpSpec};

    const POLL: Duration = Duration::from_secs(10);

    fn ctx() -> PhaseContext<'static> {
        PhaseContext::starting_now(Duration::from_secs(60), &[])
    }

    fn deployment(replicas: i32, ready: i32, generation: i64, observed: i64) -> Deployment {
        let mut deploy = Deployment {
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                ..Default::default()
            }),
            status: Some(DeploymentStatus {
                ready_replicas: Some(ready),
                observed_generation: Some(observed),
                ..Default::default()
            }),
            ..Default::default()
        };
        deploy.metadata.generation = Some(generation);
        deploy
    }

    fn api_phase(mock: MockPulpKubeClient) -> WorkloadReadiness {
        WorkloadReadiness::new(
            Tier::Api,
            WorkloadKind::Deployment,
            "api",
            Arc::new(mock),
            POLL,
        )
    }

    mod rollout {
        use super::*;

        #[test]
        fn ready_when_replicas_and_generation_caught_up() {
            assert!(Rollout::from(&deployment(2, 2, 3, 3)).is_ready());
        }

        #[test]
        fn not_ready_while_replicas_missing() {
            assert!(!Rollout::from(&deployment(2, 1, 3, 3)).is_ready());
        }

        #[test]
        fn not_ready_while_generation_behind() {
            assert!(!Rollout::from(&deployment(2, 2, 4, 3)).is_ready());
        }

        #[test]
        fn status_less_deployment_is_not_ready() {
            let deploy = Deployment::default();
            assert!(!Rollout::from(&deploy).is_ready());
        }
    }

    mod workloads {
        use super::*;

        #[tokio::test]
        async fn rolled_out_deployment_continues() {
            let mut mock = MockPulpKubeClient::new();
            mock.expect_get_deployment()
                .withf(|ns, name| ns == "ns1" && name == "galaxy-api")
                .returning(|_, _| Ok(Some(deployment(1, 1, 1, 1))));

            let pulp = sample_pulp(PulpSpec::default());
            let outcome = api_phase(mock).reconcile(&ctx(), &pulp).await.unwrap();
            assert_eq!(outcome, PhaseOutcome::Continue);
        }

        #[tokio::test]
        async fn missing_deployment_polls() {
            let mut mock = MockPulpKubeClient::new();
            mock.expect_get_deployment().returning(|_, _| Ok(None));

            let pulp = sample_pulp(PulpSpec::default());
            let outcome = api_phase(mock).reconcile(&ctx(), &pulp).await.unwrap();
            assert_eq!(outcome, PhaseOutcome::RequeueAfter(POLL));
        }

        #[tokio::test]
        async fn lookup_errors_propagate() {
            let mut mock = MockPulpKubeClient::new();
            mock.expect_get_deployment()
                .returning(|_, _| Err(Error::internal("connection reset")));

            let pulp = sample_pulp(PulpSpec::default());
            assert!(api_phase(mock).reconcile(&ctx(), &pulp).await.is_err());
        }

        #[tokio::test]
        async fn expired_deadline_skips_lookup() {
            let mut mock = MockPulpKubeClient::new();
            mock.expect_get_deployment().never();

            let pulp = sample_pulp(PulpSpec::default());
            let expired = PhaseContext::starting_now(Duration::ZERO, &[]);
            let err = api_phase(mock).reconcile(&expired, &pulp).await.unwrap_err();
            assert!(matches!(err, Error::Timeout { .. }));
        }

        #[tokio::test]
        async fn database_reads_stateful_set() {
            let mut mock = MockPulpKubeClient::new();
            mock.expect_get_deployment().never();
            mock.expect_get_stateful_set()
                .withf(|_, name| name == "galaxy-database")
                .returning(|_, _| {
                    Ok(Some(StatefulSet {
                        status: Some(StatefulSetStatus {
                            ready_replicas: Some(1),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }))
                });

            let phase = WorkloadReadiness::new(
                Tier::Database,
                WorkloadKind::StatefulSet,
                "database",
                Arc::new(mock),
                POLL,
            );
            let pulp = sample_pulp(PulpSpec::default());
            let outcome = phase.reconcile(&ctx(), &pulp).await.unwrap();
            assert_eq!(outcome, PhaseOutcome::Continue);
        }
    }

    mod cache {
        use super::*;

        fn with_cache(cache: CacheSpec) -> Pulp {
            sample_pulp(PulpSpec {
                cache: Some(cache),
                ..Default::default()
            })
        }

        #[tokio::test]
        async fn disabled_cache_skips_lookup() {
            let mut mock = MockPulpKubeClient::new();
            mock.expect_get_deployment().never();
            let phase = CachePhase::new(Arc::new(mock), POLL);

            let pulp = with_cache(CacheSpec {
                enabled: false,
                ..Default::default()
            });
            let outcome = phase.reconcile(&ctx(), &pulp).await.unwrap();
            assert_eq!(outcome, PhaseOutcome::Continue);
        }

        #[tokio::test]
        async fn external_cache_skips_lookup() {
            let mut mock = MockPulpKubeClient::new();
            mock.expect_get_deployment().never();
            let phase = CachePhase::new(Arc::new(mock), POLL);

            let pulp = with_cache(CacheSpec {
                external_cache_secret: Some("elasticache".to_string()),
                ..Default::default()
            });
            let outcome = phase.reconcile(&ctx(), &pulp).await.unwrap();
            assert_eq!(outcome, PhaseOutcome::Continue);
        }

        #[tokio::test]
        async fn default_cache_waits_for_redis() {
            let mut mock = MockPulpKubeClient::new();
            mock.expect_get_deployment()
                .withf(|_, name| name == "galaxy-redis")
                .returning(|_, _| Ok(None));
            let phase = CachePhase::new(Arc::new(mock), POLL);

            let pulp = sample_pulp(PulpSpec::default());
            let outcome = phase.reconcile(&ctx(), &pulp).await.unwrap();
            assert_eq!(outcome, PhaseOutcome::RequeueAfter(POLL));
        }

        #[tokio::test]
        async fn memcached_block_selects_memcached() {
            let mut mock = MockPulpKubeClient::new();
            mock.expect_get_deployment()
                .withf(|_, name| name == "galaxy-memcached")
                .returning(|_, _| Ok(Some(deployment(1, 1, 1, 1))));
            let phase = CachePhase::new(Arc::new(mock), POLL);

            let pulp = with_cache(CacheSpec {
                memcached: Some(MemcachedCacheSpec {
                    memory_limit_mb: Some(64),
                    ..Default::default()
                }),
                ..Default::default()
            });
            let outcome = phase.reconcile(&ctx(), &pulp).await.unwrap();
            assert_eq!(outcome, PhaseOutcome::Continue);
        }
    }

    mod route {
        use super::*;

        fn route(status: serde_json::Value) -> DynamicObject {
            let ar = ApiResource {
                group: "route.openshift.io".to_string(),
                version: "v1".to_string(),
                api_version: "route.openshift.io/v1".to_string(),
                kind: "Route".to_string(),
                plural: "routes".to_string(),
            };
            DynamicObject::new("galaxy", &ar).data(serde_json::json!({ "status": status }))
        }

        #[test]
        fn admitted_condition_is_required() {
            let admitted = route(serde_json::json!({
                "ingress": [{"conditions": [{"type": "Admitted", "status": "True"}]}]
            }));
            assert!(route_admitted(&admitted));

            let rejected = route(serde_json::json!({
                "ingress": [{"conditions": [{"type": "Admitted", "status": "False"}]}]
            }));
            assert!(!route_admitted(&rejected));

            assert!(!route_admitted(&route(serde_json::json!({}))));
        }

        #[tokio::test]
        async fn missing_route_polls() {
            let mut mock = MockPulpKubeClient::new();
            mock.expect_get_route()
                .withf(|ns, name| ns == "ns1" && name == "galaxy")
                .returning(|_, _| Ok(None));
            let phase = RoutePhase::new(Arc::new(mock), POLL);

            let pulp = sample_pulp(PulpSpec::default());
            let outcome = phase.reconcile(&ctx(), &pulp).await.unwrap();
            assert_eq!(outcome, PhaseOutcome::RequeueAfter(POLL));
        }
    }
}
