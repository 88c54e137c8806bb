// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # microchain Node
//!
//! Entry point for the `microchain-node` binary. Parses CLI arguments,
//! initializes logging and metrics, starts the peer node and serves the
//! admin HTTP API.
//!
//! The binary supports three subcommands:
//!
//! - `run`     start the node
//! - `init`    generate a key file
//! - `version` print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

use microchain_protocol::crypto::KeyPair;
use microchain_protocol::network::Node;

use cli::{Commands, MicrochainNodeCli};
use logging::LogFormat;
use metrics::NodeMetrics;

/// How often the gauges are refreshed from the node's status.
const METRICS_REFRESH_PERIOD: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = MicrochainNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the peer node, the admin API and the metrics endpoint, then
/// waits for a shutdown signal.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(
        logging::RUN_DIRECTIVES,
        LogFormat::from_str_lossy(&args.log_format),
    )?;

    let config = args.node_config()?;
    let keypair = args.keypair()?;

    tracing::info!(
        listen = %config.listen_address,
        bootstrap = ?config.bootstrap_peers,
        api_port = args.api_port,
        metrics_port = args.metrics_port,
        "starting microchain-node"
    );

    // --- Peer node ---
    let handle = Node::start(keypair, config)
        .await
        .context("failed to start the peer node")?;
    let node = Arc::clone(handle.node());
    tracing::info!(
        public_key = %node.public_key_string(),
        address = %node.address(),
        "node identity"
    );

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);

    // --- API server ---
    let app_state = api::AppState {
        node: Arc::clone(&node),
        metrics: Arc::clone(&node_metrics),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("admin API listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("metrics server listening on {}", metrics_addr);

    // --- Gauge refresh ---
    let mut stop = handle.subscribe();
    let refresh_node = Arc::clone(&node);
    let refresh_metrics = Arc::clone(&node_metrics);
    let refresh = tokio::spawn(async move {
        let mut interval = tokio::time::interval(METRICS_REFRESH_PERIOD);
        loop {
            tokio::select! {
                _ = interval.tick() => refresh_metrics.observe(&refresh_node.status()),
                _ = stop.changed() => break,
            }
        }
    });

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!(error = %e, "API server error");
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!(error = %e, "metrics server error");
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    handle.shutdown().await;
    if let Err(e) = refresh.await {
        tracing::warn!(error = %e, "metrics refresh task ended abnormally");
    }
    tracing::info!("microchain-node stopped");
    Ok(())
}

/// Generates a P-256 key and writes it, hex encoded, to the key file.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging(logging::INIT_DIRECTIVES, LogFormat::Pretty)?;

    let key_path = &args.key_file;
    if key_path.exists() && !args.force {
        bail!(
            "{} already exists, pass --force to overwrite it",
            key_path.display()
        );
    }
    if let Some(parent) = key_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let keypair = KeyPair::generate()?;
    let public_key = keypair.public_key().to_base58();
    std::fs::write(key_path, hex::encode(keypair.private_key_bytes()))
        .with_context(|| format!("failed to write key to {}", key_path.display()))?;

    // Restrict permissions on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(key_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!(
        public_key = %public_key,
        key_path = %key_path.display(),
        "node key generated"
    );

    println!("Key generated.");
    println!("  Key file   : {}", key_path.display());
    println!("  Public key : {}", public_key);

    Ok(())
}

fn print_version() {
    println!("microchain-node {}", env!("CARGO_PKG_VERSION"));
    println!("api             {}", microchain_protocol::config::API_VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
