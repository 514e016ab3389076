//! Pulp controller implementation
//!
//! This module implements the reconciliation logic for Pulp resources.
//! A reconcile validates the desired state, makes sure the namespace has
//! the default pull secret, then walks the tier phases in order. The
//! status phase runs last and is the only writer of `Pulp.status`.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use pulp_common::crd::Pulp;
use pulp_common::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use pulp_common::{Error, CONTROLLER_NAME, DEFAULT_PULL_SECRET_NAME};

use crate::client::{KubeClientImpl, PulpKubeClient};
use crate::credentials::{ensure_default_credential, CredentialOutcome};
use crate::phases::{run_phases, LoopOutcome, StatusAggregator, TierPhases};
use crate::platform::{ApiGroupDetector, PlatformDetector};

/// Timing knobs for the reconcile loop
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    /// How long a tier waits before checking an unready workload again
    pub poll_interval: Duration,
    /// Delay for a plain requeue, e.g. after a status write conflict
    pub requeue_delay: Duration,
    /// Upper bound for one reconcile invocation
    pub reconcile_timeout: Duration,
    /// Retry delay after an error that will not clear on its own
    pub permanent_retry: Duration,
    /// Retry delay after any other error
    pub error_retry: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            requeue_delay: Duration::from_secs(1),
            reconcile_timeout: Duration::from_secs(120),
            permanent_retry: Duration::from_secs(300),
            error_retry: Duration::from_secs(5),
        }
    }
}

/// Controller context containing shared state and clients
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```text
/// let ctx = Context::builder(client)
///     .config(config)
///     .build();
/// ```
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn PulpKubeClient>,
    /// Event publisher for emitting Kubernetes Events
    pub events: Arc<dyn EventPublisher>,
    /// Tells whether OpenShift Routes are available
    pub platform: Arc<dyn PlatformDetector>,
    /// One phase per tier
    pub phases: TierPhases,
    /// Status writer, also used for validation failures
    pub status: Arc<StatusAggregator>,
    /// Loop timing
    pub config: ControllerConfig,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a context for testing with custom mock clients
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn PulpKubeClient>,
        platform: Arc<dyn PlatformDetector>,
    ) -> Self {
        use pulp_common::events::NoopEventPublisher;

        let config = ControllerConfig::default();
        let events: Arc<dyn EventPublisher> = Arc::new(NoopEventPublisher);
        let status = Arc::new(StatusAggregator::new(kube.clone(), events.clone()));
        Self {
            phases: TierPhases::readiness(kube.clone(), config.poll_interval, status.clone()),
            kube,
            events,
            platform,
            status,
            config,
        }
    }
}

/// Builder for [`Context`]
pub struct ContextBuilder {
    client: Client,
    kube: Option<Arc<dyn PulpKubeClient>>,
    events: Option<Arc<dyn EventPublisher>>,
    platform: Option<Arc<dyn PlatformDetector>>,
    config: ControllerConfig,
}

impl ContextBuilder {
    /// Create a new builder with the given Kubernetes client
    fn new(client: Client) -> Self {
        Self {
            client,
            kube: None,
            events: None,
            platform: None,
            config: ControllerConfig::default(),
        }
    }

    /// Override the Kubernetes client (primarily for testing)
    pub fn kube_client(mut self, kube: Arc<dyn PulpKubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the event publisher
    pub fn event_publisher(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Override platform detection, e.g. to force Route support on or off
    pub fn platform_detector(mut self, platform: Arc<dyn PlatformDetector>) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Set loop timing
    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        let kube = self
            .kube
            .unwrap_or_else(|| Arc::new(KubeClientImpl::new(self.client.clone())));
        let events = self.events.unwrap_or_else(|| {
            Arc::new(KubeEventPublisher::new(
                self.client.clone(),
                CONTROLLER_NAME,
            ))
        });
        let platform = self
            .platform
            .unwrap_or_else(|| Arc::new(ApiGroupDetector::new(self.client.clone())));
        let status = Arc::new(StatusAggregator::new(kube.clone(), events.clone()));

        Context {
            phases: TierPhases::readiness(kube.clone(), self.config.poll_interval, status.clone()),
            kube,
            events,
            platform,
            status,
            config: self.config,
        }
    }
}

/// Reconcile a Pulp resource
///
/// Runs [`reconcile_identity`] for the Pulp's namespace/name under the
/// configured deadline and turns the outcome into an [`Action`].
#[instrument(skip(pulp, ctx), fields(pulp = %pulp.name_any()))]
pub async fn reconcile(pulp: Arc<Pulp>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = pulp.name_any();
    let namespace = pulp
        .namespace()
        .ok_or_else(|| Error::internal_with_context("reconciler", "Pulp has no namespace"))?;
    debug!("reconciling pulp");

    let budget = ctx.config.reconcile_timeout;
    let outcome = tokio::time::timeout(budget, reconcile_identity(&namespace, &name, &ctx))
        .await
        .map_err(|_| Error::Timeout {
            pulp: name.clone(),
            after: budget,
        })??;

    Ok(outcome.into_action(ctx.config.requeue_delay))
}

/// One pass of the loop for the Pulp at `namespace/name`.
///
/// The Pulp is re-read so every pass works on the latest snapshot. A Pulp
/// that no longer exists is done; its owned objects are garbage collected.
pub async fn reconcile_identity(
    namespace: &str,
    name: &str,
    ctx: &Context,
) -> Result<LoopOutcome, Error> {
    let started = Instant::now();

    let Some(pulp) = ctx.kube.get_pulp(namespace, name).await? else {
        debug!(namespace, pulp = name, "pulp not found, nothing to do");
        return Ok(LoopOutcome::Done);
    };

    // Routes are only checked for when the Pulp asks for one
    let is_openshift = if pulp.spec.is_route_ingress() {
        ctx.platform.is_openshift().await?
    } else {
        false
    };

    let validated = pulp
        .spec
        .validate_preconditions(name, is_openshift)
        .and_then(|()| pulp.spec.resolve_storage(name));
    let storage = match validated {
        Ok(storage) => storage,
        Err(err) => {
            warn!(pulp = name, error = %err, "desired state rejected");
            if let Err(write_err) = ctx.status.record_failure(&pulp, &err).await {
                warn!(pulp = name, error = %write_err, "failed to record validation failure");
            }
            return Err(err);
        }
    };
    debug!(pulp = name, ?storage, "storage resolved");

    if ensure_default_credential(ctx.kube.as_ref(), namespace).await?
        == CredentialOutcome::Created
    {
        ctx.events
            .publish(
                &pulp.object_ref(&()),
                EventType::Normal,
                reasons::PULL_SECRET_CREATED,
                actions::PROVISION,
                Some(format!("Created pull secret {DEFAULT_PULL_SECRET_NAME}")),
            )
            .await;
    }

    let phases = ctx.phases.plan(&pulp.spec);
    let budget = ctx.config.reconcile_timeout.saturating_sub(started.elapsed());
    match run_phases(&phases, &pulp, budget).await {
        Ok(LoopOutcome::Done) => {
            info!(pulp = name, "pulp converged");
            Ok(LoopOutcome::Done)
        }
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            ctx.events
                .publish(
                    &pulp.object_ref(&()),
                    EventType::Warning,
                    reasons::PHASE_FAILED,
                    actions::RECONCILE,
                    Some(err.to_string()),
                )
                .await;
            Err(err)
        }
    }
}

/// Error policy for the controller
///
/// Validation errors need a spec edit to clear, which triggers a reconcile
/// on its own. They and the other non-retryable errors are retried slowly;
/// everything else is retried soon.
pub fn error_policy(pulp: Arc<Pulp>, error: &Error, ctx: Arc<Context>) -> Action {
    if error.is_validation() {
        warn!(
            error = %error,
            pulp = %pulp.name_any(),
            "pulp desired state is invalid"
        );
        Action::requeue(ctx.config.permanent_retry)
    } else if !error.is_retryable() {
        error!(
            ?error,
            pulp = %pulp.name_any(),
            "reconciliation failed with non-retryable error"
        );
        Action::requeue(ctx.config.permanent_retry)
    } else {
        error!(
            ?error,
            pulp = %pulp.name_any(),
            "reconciliation failed"
        );
        Action::requeue(ctx.config.error_retry)
    }
}
