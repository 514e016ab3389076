//! Status aggregation: the only writer of `Pulp.status`.

use std::sync::Arc;

use async_trait::async_trait;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

use pulp_common::crd::{Condition, ConditionStatus, Pulp, PulpPhase, PulpStatus};
use pulp_common::events::{actions, reasons, EventPublisher};
use pulp_common::Error;

use super::{Phase, PhaseContext, PhaseOutcome, PhaseResult, Tier};
use crate::client::PulpKubeClient;

/// Overall condition type
const READY_CONDITION: &str = "Ready";

/// What happened to a status write
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusWrite {
    /// Recorded status already said the same thing
    Unchanged,
    /// New status stored
    Written,
    /// Someone else updated the Pulp since it was read
    Conflict,
}

/// Builds and writes `PulpStatus`, skipping writes that would change nothing
pub struct StatusAggregator {
    kube: Arc<dyn PulpKubeClient>,
    events: Arc<dyn EventPublisher>,
}

impl StatusAggregator {
    /// Create an aggregator writing through `kube`
    pub fn new(kube: Arc<dyn PulpKubeClient>, events: Arc<dyn EventPublisher>) -> Self {
        Self { kube, events }
    }

    /// Status for a Pulp whose planned tiers all converged
    pub fn ready_status(pulp: &Pulp, completed: &[Tier]) -> PulpStatus {
        let previous = previous_conditions(pulp);
        let mut conditions: Vec<Condition> = completed
            .iter()
            .map(|tier| {
                Condition::new(
                    tier.condition_type(),
                    ConditionStatus::True,
                    "TierReady",
                    format!("{tier} tier is ready"),
                )
                .carry_transition_time(previous)
            })
            .collect();
        conditions.push(
            Condition::new(
                READY_CONDITION,
                ConditionStatus::True,
                reasons::PULP_READY,
                "All tiers are ready",
            )
            .carry_transition_time(previous),
        );

        PulpStatus {
            phase: PulpPhase::Ready,
            message: Some("All tiers are ready".to_string()),
            tiers: completed.iter().map(|t| t.to_string()).collect(),
            conditions,
            observed_generation: pulp.metadata.generation,
        }
    }

    /// Status for a Pulp whose desired state was rejected
    pub fn failed_status(pulp: &Pulp, err: &Error) -> PulpStatus {
        let message = err.to_string();
        let condition = Condition::new(
            READY_CONDITION,
            ConditionStatus::False,
            reasons::VALIDATION_FAILED,
            message.clone(),
        )
        .carry_transition_time(previous_conditions(pulp));

        PulpStatus {
            phase: PulpPhase::Failed,
            message: Some(message),
            tiers: Vec::new(),
            conditions: vec![condition],
            observed_generation: pulp.metadata.generation,
        }
    }

    /// Store `status` on `pulp` unless the recorded status already matches.
    ///
    /// The write carries the snapshot's resourceVersion; losing that race
    /// is reported as [`StatusWrite::Conflict`] rather than an error.
    pub async fn write(&self, pulp: &Pulp, status: PulpStatus) -> Result<StatusWrite, Error> {
        if let Some(current) = &pulp.status {
            if current.same_summary(&status) {
                debug!(pulp = %pulp.name_any(), phase = %status.phase, "status unchanged, skipping update");
                return Ok(StatusWrite::Unchanged);
            }
        }

        match self.kube.replace_pulp_status(pulp, &status).await {
            Ok(()) => {
                info!(pulp = %pulp.name_any(), phase = %status.phase, "updated status");
                Ok(StatusWrite::Written)
            }
            Err(Error::Conflict { .. }) => {
                debug!(pulp = %pulp.name_any(), "status write lost a race");
                Ok(StatusWrite::Conflict)
            }
            Err(e) => Err(e),
        }
    }

    /// Record a validation failure on the Pulp.
    ///
    /// The Warning event is only emitted when the recorded status actually
    /// changed, so a Pulp stuck on the same bad spec does not flood events.
    pub async fn record_failure(&self, pulp: &Pulp, err: &Error) -> Result<StatusWrite, Error> {
        let outcome = self.write(pulp, Self::failed_status(pulp, err)).await?;
        if outcome == StatusWrite::Written {
            self.events
                .publish(
                    &pulp.object_ref(&()),
                    EventType::Warning,
                    reasons::VALIDATION_FAILED,
                    actions::VALIDATE,
                    Some(err.to_string()),
                )
                .await;
        }
        Ok(outcome)
    }
}

fn previous_conditions(pulp: &Pulp) -> &[Condition] {
    pulp.status
        .as_ref()
        .map(|s| s.conditions.as_slice())
        .unwrap_or_default()
}

#[async_trait]
impl Phase for StatusAggregator {
    fn tier(&self) -> Tier {
        Tier::Status
    }

    async fn reconcile(&self, ctx: &PhaseContext<'_>, pulp: &Pulp) -> PhaseResult {
        let status = Self::ready_status(pulp, ctx.completed);
        match ctx.within(pulp, self.write(pulp, status)).await? {
            StatusWrite::Unchanged => Ok(PhaseOutcome::Continue),
            StatusWrite::Written => {
                self.events
                    .publish(
                        &pulp.object_ref(&()),
                        EventType::Normal,
                        reasons::PULP_READY,
                        actions::RECONCILE,
                        Some("All tiers are ready".to_string()),
                    )
                    .await;
                Ok(PhaseOutcome::Continue)
            }
            StatusWrite::Conflict => Ok(PhaseOutcome::Requeue),
        }
    }
}
