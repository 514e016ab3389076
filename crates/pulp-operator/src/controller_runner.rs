//! Controller runner - wires the Pulp reconciler to its watches
//!
//! The Pulp itself is the primary watch. Changes to owned StatefulSets,
//! Deployments, Services, Secrets and ConfigMaps are mapped back to the
//! Pulp holding their controller reference.

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, Resource};

use pulp_common::crd::Pulp;
use pulp_controller::{error_policy, owner_request, reconcile, Context, OWNED_KINDS};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

/// Api for `K` in `namespace`, or across the cluster when unset
fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Run the Pulp controller until a shutdown signal arrives
pub async fn run_pulp_controller(client: Client, ctx: Arc<Context>, namespace: Option<String>) {
    let ns = namespace.as_deref();
    match ns {
        Some(ns) => tracing::info!(namespace = %ns, "watching Pulps in one namespace"),
        None => tracing::info!("watching Pulps in all namespaces"),
    }
    tracing::info!(owned = ?OWNED_KINDS, "- Pulp controller");

    Controller::new(scoped_api::<Pulp>(&client, ns), watcher_config())
        .watches(
            scoped_api::<StatefulSet>(&client, ns),
            watcher_config(),
            |sts| owner_request(&sts.metadata),
        )
        .watches(
            scoped_api::<Deployment>(&client, ns),
            watcher_config(),
            |deploy| owner_request(&deploy.metadata),
        )
        .watches(
            scoped_api::<Service>(&client, ns),
            watcher_config(),
            |svc| owner_request(&svc.metadata),
        )
        .watches(
            scoped_api::<Secret>(&client, ns),
            watcher_config(),
            |secret| owner_request(&secret.metadata),
        )
        .watches(
            scoped_api::<ConfigMap>(&client, ns),
            watcher_config(),
            |cm| owner_request(&cm.metadata),
        )
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(log_reconcile_result("Pulp"))
        .await;
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
