use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, Subcommand};
use kube::CustomResourceExt;
use kube_converge::controller::RouterReconciler;
use kube_converge::crd::Router;
use kube_converge::engine::{EngineConfig, LeaderElection, LeaderState, Manager};
use kube_converge::telemetry::{self, resolve_endpoint, TelemetryConfig};
use kube_converge::Error;
use tracing::info;

const LEASE_NAME: &str = "converge-operator-leader";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the operator
    Run(RunArgs),
    /// Show version and build information
    Version,
    /// Print the Router CustomResourceDefinition as YAML
    Crd,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Namespace holding the leader election lease
    #[arg(long, env = "OPERATOR_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Reconcile without acquiring the lease (single replica only)
    #[arg(long, env = "DISABLE_LEADER_ELECTION")]
    disable_leader_election: bool,

    /// Address serving /healthz and /metrics
    #[arg(long, env = "HTTP_ADDR", default_value = "0.0.0.0:8080")]
    http_addr: SocketAddr,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    json_logs: bool,

    /// OTLP endpoint for span export; falls back to OTEL_EXPORTER_OTLP_ENDPOINT
    #[arg(long)]
    otlp_endpoint: Option<String>,

    /// Upper bound on objects reconciled in parallel (0 = unbounded)
    #[arg(long, env = "MAX_CONCURRENT_RECONCILES", default_value_t = 4)]
    max_concurrent_reconciles: u16,

    /// Requeue interval for fully reconciled objects, in seconds
    #[arg(long, env = "STEADY_INTERVAL_SECS", default_value_t = 300)]
    steady_interval_secs: u64,

    /// Requeue interval while a check is still converging, in seconds
    #[arg(long, env = "STILL_RUNNING_INTERVAL_SECS", default_value_t = 5)]
    still_running_interval_secs: u64,

    /// First retry delay after a failed attempt, in seconds
    #[arg(long, env = "BACKOFF_BASE_SECS", default_value_t = 2)]
    backoff_base_secs: u64,

    /// Longest retry delay after repeated failures, in seconds
    #[arg(long, env = "BACKOFF_MAX_SECS", default_value_t = 300)]
    backoff_max_secs: u64,
}

impl RunArgs {
    fn engine_config(&self) -> Result<EngineConfig, Error> {
        if self.steady_interval_secs == 0 || self.still_running_interval_secs == 0 {
            return Err(Error::ConfigError(
                "requeue intervals must be at least one second".to_string(),
            ));
        }
        if self.backoff_base_secs == 0 || self.backoff_max_secs < self.backoff_base_secs {
            return Err(Error::ConfigError(format!(
                "invalid backoff: base {}s, max {}s",
                self.backoff_base_secs, self.backoff_max_secs
            )));
        }
        Ok(EngineConfig {
            steady_interval: Duration::from_secs(self.steady_interval_secs),
            still_running_interval: Duration::from_secs(self.still_running_interval_secs),
            backoff_base: Duration::from_secs(self.backoff_base_secs),
            backoff_max: Duration::from_secs(self.backoff_max_secs),
            max_concurrent_reconciles: self.max_concurrent_reconciles,
            ..EngineConfig::default()
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("converge-operator v{}", env!("CARGO_PKG_VERSION"));
            println!("Build Date: {}", env!("BUILD_DATE"));
            println!("Git SHA: {}", env!("GIT_SHA"));
            println!("Rust Version: {}", env!("RUST_VERSION"));
            Ok(())
        }
        Commands::Crd => {
            let yaml = serde_yaml::to_string(&Router::crd())
                .map_err(|e| Error::ConfigError(format!("failed to render CRD: {e}")))?;
            print!("{yaml}");
            Ok(())
        }
        Commands::Run(run_args) => run_operator(run_args).await,
    }
}

async fn run_operator(args: RunArgs) -> Result<(), Error> {
    telemetry::init_tracing(&TelemetryConfig {
        json_logs: args.json_logs,
        otlp_endpoint: resolve_endpoint(
            args.otlp_endpoint.clone(),
            std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
        ),
        ..TelemetryConfig::default()
    })?;

    let config = args.engine_config()?;
    info!("Starting converge-operator v{}", env!("CARGO_PKG_VERSION"));

    let client = kube::Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let leader = if args.disable_leader_election {
        info!("Leader election disabled");
        LeaderState::always()
    } else {
        let leader_namespace =
            std::env::var("POD_NAMESPACE").unwrap_or_else(|_| args.namespace.clone());
        let holder_identity = std::env::var("HOSTNAME").unwrap_or_else(|_| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown-host".to_string())
        });
        LeaderElection::new(client.clone(), &leader_namespace, LEASE_NAME, &holder_identity).spawn()
    };

    #[cfg(feature = "rest-api")]
    {
        let state = kube_converge::rest_api::ApiState {
            leader: leader.clone(),
        };
        let addr = args.http_addr;
        tokio::spawn(async move {
            if let Err(e) = kube_converge::rest_api::run_server(state, addr).await {
                tracing::error!("HTTP server error: {:?}", e);
            }
        });
    }

    let manager = Manager::new(client, config).with_leader(leader);
    let result = manager.run(RouterReconciler).await;

    // Flush any remaining traces
    telemetry::shutdown_telemetry();

    result
}
