//! Tier phases and the sequencer that runs them.
//!
//! A Pulp installation converges tier by tier: database, cache, the three
//! application tiers, then either an OpenShift Route or the web proxy, and
//! finally the status write. Each tier is a [`Phase`]; [`run_phases`] walks
//! the planned list in order and stops at the first phase that is not done.

mod status;
mod workload;

pub use status::{StatusAggregator, StatusWrite};
pub use workload::{CachePhase, RoutePhase, WorkloadKind, WorkloadReadiness};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tokio::time::Instant;
use tracing::debug;

use pulp_common::crd::{Pulp, PulpSpec};
use pulp_common::Error;

use crate::client::PulpKubeClient;

/// One step of the installation, in sequencer order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Managed PostgreSQL
    Database,
    /// Redis or Memcached
    Cache,
    /// REST API server
    Api,
    /// Content server
    Content,
    /// Task workers
    Worker,
    /// OpenShift Route exposing the content and api tiers
    Route,
    /// Reverse proxy used when no Route is available
    Web,
    /// Status write, always last
    Status,
}

impl Tier {
    /// Condition type reported for this tier, e.g. `ApiReady`
    pub fn condition_type(&self) -> String {
        format!("{self}Ready")
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Database => write!(f, "Database"),
            Self::Cache => write!(f, "Cache"),
            Self::Api => write!(f, "Api"),
            Self::Content => write!(f, "Content"),
            Self::Worker => write!(f, "Worker"),
            Self::Route => write!(f, "Route"),
            Self::Web => write!(f, "Web"),
            Self::Status => write!(f, "Status"),
        }
    }
}

/// What a phase asks the sequencer to do next
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// Tier converged, run the next one
    Continue,
    /// Stop and reconcile again shortly
    Requeue,
    /// Stop and reconcile again after the given delay
    RequeueAfter(Duration),
}

/// Result of a single phase
pub type PhaseResult = Result<PhaseOutcome, Error>;

/// Per-invocation data handed to every phase
#[derive(Clone, Copy, Debug)]
pub struct PhaseContext<'a> {
    /// Point in time the whole invocation must finish by; `None` when the
    /// budget is too large to represent
    pub deadline: Option<Instant>,
    /// Budget the deadline was derived from, reported on timeout
    pub budget: Duration,
    /// Tiers that already returned `Continue` in this invocation
    pub completed: &'a [Tier],
}

impl<'a> PhaseContext<'a> {
    /// Context whose deadline lies `budget` from now
    pub fn starting_now(budget: Duration, completed: &'a [Tier]) -> Self {
        Self {
            deadline: Instant::now().checked_add(budget),
            budget,
            completed,
        }
    }

    /// Whether the deadline has passed
    pub fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn timeout(&self, pulp: &Pulp) -> Error {
        Error::Timeout {
            pulp: pulp.name_any(),
            after: self.budget,
        }
    }

    /// Run a cluster call for `pulp`, failing with [`Error::Timeout`] once
    /// the deadline passes, including when it already has.
    pub async fn within<T, F>(&self, pulp: &Pulp, call: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        let Some(deadline) = self.deadline else {
            return call.await;
        };
        if self.expired() {
            return Err(self.timeout(pulp));
        }
        tokio::time::timeout_at(deadline, call)
            .await
            .map_err(|_| self.timeout(pulp))?
    }
}

/// A single tier of the installation.
///
/// Phases read the Pulp snapshot and must be idempotent: running one twice
/// against an unchanged cluster has no further effect.
#[async_trait]
pub trait Phase: Send + Sync {
    /// Which tier this phase drives
    fn tier(&self) -> Tier;

    /// Converge the tier for `pulp`
    async fn reconcile(&self, ctx: &PhaseContext<'_>, pulp: &Pulp) -> PhaseResult;
}

/// Outcome of a whole reconcile invocation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopOutcome {
    /// Converged; wait for the next change
    Done,
    /// Reconcile again shortly
    Requeue,
    /// Reconcile again after the given delay
    RequeueAfter(Duration),
}

impl LoopOutcome {
    /// Convert into a controller action, using `requeue_delay` for plain requeues
    pub fn into_action(self, requeue_delay: Duration) -> Action {
        match self {
            LoopOutcome::Done => Action::await_change(),
            LoopOutcome::Requeue => Action::requeue(requeue_delay),
            LoopOutcome::RequeueAfter(delay) => Action::requeue(delay),
        }
    }
}

/// Tiers to run for `spec`, in order.
///
/// The database tier is skipped for an external database. Exactly one of
/// route and web is present.
pub fn plan_tiers(spec: &PulpSpec) -> Vec<Tier> {
    let mut tiers = Vec::with_capacity(7);
    if spec.database_mode().is_managed() {
        tiers.push(Tier::Database);
    }
    tiers.extend([Tier::Cache, Tier::Api, Tier::Content, Tier::Worker]);
    tiers.push(if spec.is_route_ingress() {
        Tier::Route
    } else {
        Tier::Web
    });
    tiers.push(Tier::Status);
    tiers
}

/// One phase implementation per tier
#[derive(Clone)]
pub struct TierPhases {
    /// Database tier
    pub database: Arc<dyn Phase>,
    /// Cache tier
    pub cache: Arc<dyn Phase>,
    /// Api tier
    pub api: Arc<dyn Phase>,
    /// Content tier
    pub content: Arc<dyn Phase>,
    /// Worker tier
    pub worker: Arc<dyn Phase>,
    /// Route tier
    pub route: Arc<dyn Phase>,
    /// Web tier
    pub web: Arc<dyn Phase>,
    /// Status aggregation
    pub status: Arc<dyn Phase>,
}

impl TierPhases {
    /// Readiness observers for the workloads the tier builders own.
    ///
    /// Every tier except status only reads the cluster; missing or
    /// unready workloads requeue after `poll_interval`.
    pub fn readiness(
        kube: Arc<dyn PulpKubeClient>,
        poll_interval: Duration,
        status: Arc<StatusAggregator>,
    ) -> Self {
        let workload = |tier, kind, suffix| -> Arc<dyn Phase> {
            Arc::new(WorkloadReadiness::new(
                tier,
                kind,
                suffix,
                kube.clone(),
                poll_interval,
            ))
        };
        Self {
            database: workload(Tier::Database, WorkloadKind::StatefulSet, "database"),
            cache: Arc::new(CachePhase::new(kube.clone(), poll_interval)),
            api: workload(Tier::Api, WorkloadKind::Deployment, "api"),
            content: workload(Tier::Content, WorkloadKind::Deployment, "content"),
            worker: workload(Tier::Worker, WorkloadKind::Deployment, "worker"),
            route: Arc::new(RoutePhase::new(kube.clone(), poll_interval)),
            web: workload(Tier::Web, WorkloadKind::Deployment, "web"),
            status,
        }
    }

    /// Phase for a single tier
    pub fn get(&self, tier: Tier) -> Arc<dyn Phase> {
        match tier {
            Tier::Database => self.database.clone(),
            Tier::Cache => self.cache.clone(),
            Tier::Api => self.api.clone(),
            Tier::Content => self.content.clone(),
            Tier::Worker => self.worker.clone(),
            Tier::Route => self.route.clone(),
            Tier::Web => self.web.clone(),
            Tier::Status => self.status.clone(),
        }
    }

    /// Phases to run for `spec`, in order
    pub fn plan(&self, spec: &PulpSpec) -> Vec<Arc<dyn Phase>> {
        plan_tiers(spec).into_iter().map(|t| self.get(t)).collect()
    }
}

/// Run `phases` in order against `pulp` within `budget`.
///
/// Stops at the first phase that errors or asks for a requeue; later phases
/// are not invoked. Errors are returned as the phase produced them.
pub async fn run_phases(
    phases: &[Arc<dyn Phase>],
    pulp: &Pulp,
    budget: Duration,
) -> Result<LoopOutcome, Error> {
    let deadline = Instant::now().checked_add(budget);
    let mut completed: Vec<Tier> = Vec::with_capacity(phases.len());

    for phase in phases {
        let tier = phase.tier();
        let ctx = PhaseContext {
            deadline,
            budget,
            completed: &completed,
        };
        if ctx.expired() {
            return Err(ctx.timeout(pulp));
        }

        match phase.reconcile(&ctx, pulp).await? {
            PhaseOutcome::Continue => {
                debug!(pulp = %pulp.name_any(), %tier, "tier converged");
                completed.push(tier);
            }
            PhaseOutcome::Requeue => {
                debug!(pulp = %pulp.name_any(), %tier, "tier requested requeue");
                return Ok(LoopOutcome::Requeue);
            }
            PhaseOutcome::RequeueAfter(delay) => {
                debug!(pulp = %pulp.name_any(), %tier, ?delay, "tier not ready yet");
                return Ok(LoopOutcome::RequeueAfter(delay));
            }
        }
    }

    Ok(LoopOutcome::Done)
}

/// Namespace and name of `pulp`
pub(crate) fn pulp_identity(pulp: &Pulp) -> Result<(String, String), Error> {
    let namespace = pulp
        .namespace()
        .ok_or_else(|| Error::internal_with_context("phase", "Pulp has no namespace"))?;
    Ok((namespace, pulp.name_any()))
}
