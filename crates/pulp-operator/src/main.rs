//! Pulp Operator - converges Pulp content-management deployments on Kubernetes

mod controller_runner;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pulp_common::crd::Pulp;
use pulp_common::CONTROLLER_NAME;
use pulp_controller::{Context, ControllerConfig};

/// Pulp Operator - reconciles Pulp resources tier by tier
#[derive(Parser, Debug)]
#[command(name = "pulp-operator", version, about, long_about = None)]
struct Cli {
    /// Generate the CRD manifest and exit
    #[arg(long)]
    crd: bool,

    /// Only watch this namespace (all namespaces when unset or empty)
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,

    /// Seconds between readiness checks of a tier that is still rolling out
    #[arg(long, env = "PULP_POLL_INTERVAL_SECS", default_value_t = 10)]
    poll_interval_secs: u64,

    /// Upper bound in seconds for a single reconcile
    #[arg(long, env = "PULP_RECONCILE_TIMEOUT_SECS", default_value_t = 120)]
    reconcile_timeout_secs: u64,

    /// Emit logs as JSON
    #[arg(long, env = "PULP_LOG_JSON")]
    log_json: bool,
}

impl Cli {
    fn watch_namespace(&self) -> Option<String> {
        self.namespace.clone().filter(|ns| !ns.is_empty())
    }

    fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            reconcile_timeout: Duration::from_secs(self.reconcile_timeout_secs),
            ..ControllerConfig::default()
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&Pulp::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_tracing(cli.log_json);

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crd_installed(&client).await?;

    let config = cli.controller_config();
    tracing::info!(
        poll_interval = ?config.poll_interval,
        reconcile_timeout = ?config.reconcile_timeout,
        "Starting Pulp operator"
    );
    let ctx = Arc::new(Context::builder(client.clone()).config(config).build());

    controller_runner::run_pulp_controller(client, ctx, cli.watch_namespace()).await;

    tracing::info!("Pulp operator shut down");
    Ok(())
}

/// Ensure the Pulp CRD is installed
///
/// The operator installs its own CRD on startup using server-side apply,
/// so the schema always matches the running operator.
async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(CONTROLLER_NAME).force();

    tracing::info!("Installing Pulp CRD...");
    crds.patch(
        &Pulp::crd_name(),
        &params,
        &Patch::Apply(&Pulp::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install Pulp CRD: {}", e))?;

    Ok(())
}
