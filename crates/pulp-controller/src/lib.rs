//! Pulp controller: reconciles Pulp resources tier by tier

#![deny(missing_docs)]

pub mod client;
pub mod controller;
pub mod credentials;
pub mod phases;
pub mod platform;
pub mod watch;

pub use client::{KubeClientImpl, PulpKubeClient};
pub use controller::{
    error_policy, reconcile, reconcile_identity, Context, ContextBuilder, ControllerConfig,
};
pub use phases::{LoopOutcome, Phase, PhaseContext, PhaseOutcome, PhaseResult, Tier};
pub use platform::{ApiGroupDetector, PlatformDetector, StaticPlatform};
pub use watch::{owner_request, OWNED_KINDS};
