//! Firewall network-service endpoint.
//!
//! # Architecture Overview
//!
//! ```text
//!   config (file + NSM_* env) ──▶ logging ──▶ ACL rules ──▶ metrics
//!                                                      │
//!                                                      ▼
//!   ┌──────────────────────────── Orchestrator ───────────────────────────┐
//!   │                                                                      │
//!   │  identity ──▶ TLS ──┬──▶ SecureListener (unix socket, mTLS) ──┐     │
//!   │                     │                                         │     │
//!   │                     └──▶ RegistrationClient ◀── listen URL ───┘     │
//!   │                                                                      │
//!   │  DataplaneConnector ──▶ fault channel ──┐                           │
//!   │  SecureListener     ──▶ fault channel ──┼──▶ Monitor ──▶ Shutdown   │
//!   │  OS signals         ──▶ control loop  ──┘                           │
//!   └──────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use firewall_nse::config::{env_usage, load_config};
use firewall_nse::dataplane::ProcessDataplane;
use firewall_nse::identity::FileIdentitySource;
use firewall_nse::lifecycle::{os_signals, Orchestrator};
use firewall_nse::observability::{init_logging, metrics};

#[derive(Debug, Parser)]
#[command(name = "firewall-nse", version, about = "Firewall network-service endpoint")]
struct Args {
    /// Optional TOML configuration file; NSM_* variables override it.
    #[arg(long, env = "NSM_CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Print the supported environment variables and exit.
    #[arg(long)]
    print_env: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if args.print_env {
        print!("{}", env_usage());
        return ExitCode::SUCCESS;
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "firewall-nse exiting with failure");
            eprintln!("firewall-nse: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(args.config.as_deref())?;

    let log_control = init_logging(&config.log_level)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "firewall-nse starting");
    tracing::info!(
        name = %config.name,
        service = %config.service_name,
        connect_to = %config.connect_to,
        "Configuration loaded"
    );

    config.load_acl_rules();

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let identity = FileIdentitySource::load(&config.identity)?;
    let _identity_watcher = if config.identity.watch {
        Some(identity.watch()?)
    } else {
        None
    };

    let orchestrator = Orchestrator::builder(config.clone())
        .identity(identity)
        .dataplane(Arc::new(ProcessDataplane::new(config.dataplane.clone())))
        .log_control(log_control)
        .signals(os_signals()?)
        .build()?;

    orchestrator.run().await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
