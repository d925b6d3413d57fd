// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Quill Node
//!
//! Entry point for the `quill-node` binary. Parses CLI arguments, restores
//! the chain from disk, starts peer replication, and serves the HTTP API
//! and the metrics endpoint.
//!
//! Subcommands:
//!
//! - `run`: start the node
//! - `init`: create the data directory and the node wallet
//! - `status`: query a running node's `/status`
//! - `version`: print build version information

mod api;
mod cli;
mod logging;
mod metrics;
mod persist;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::signal;
use tokio::sync::watch;

use quill_protocol::crypto::Wallet;
use quill_protocol::network::{ReplicationConfig, ReplicationEngine};
use quill_protocol::storage::{Ledger, LedgerDb};
use quill_protocol::vault::BalanceLedger;

use cli::{Commands, QuillNodeCli};
use logging::LogFormat;
use metrics::{MetricsState, NodeMetrics};

const WALLET_FILE: &str = "wallet.key";
const BALANCES_TREE: &str = "balances";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = QuillNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Status(args) => query_status(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the node: replication, persistence, API and metrics.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(logging::DEFAULT_FILTER, args.log_format);

    tracing::info!(
        http_port = args.http_port,
        p2p_port = args.p2p_port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        "starting quill-node"
    );

    // --- Persistent storage ---
    let db_path = args.data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
    let db = LedgerDb::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "database opened");

    let chain = persist::restore_chain(&db);

    // --- Wallet and balances ---
    let wallet_path = args.data_dir.join(WALLET_FILE);
    let wallet = Wallet::load_or_generate(&wallet_path)
        .with_context(|| format!("failed to load wallet at {}", wallet_path.display()))?;
    let balances = BalanceLedger::new(
        db.open_tree(BALANCES_TREE)
            .context("failed to open balance tree")?,
    );

    // --- Ledger and replication ---
    let ledger = Ledger::with_chain(chain);
    let metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);
    let persistence = tokio::spawn(persist::run(
        ledger.clone(),
        db.clone(),
        Arc::clone(&metrics),
        ledger.subscribe(),
    ));

    let config = ReplicationConfig {
        gossip_interval: args.gossip_interval(),
        ..ReplicationConfig::default()
    };
    let engine = ReplicationEngine::new(ledger, config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let p2p_addr = format!("0.0.0.0:{}", args.p2p_port);
    let p2p_listener = tokio::net::TcpListener::bind(&p2p_addr)
        .await
        .with_context(|| format!("failed to bind P2P listener on {}", p2p_addr))?;
    tracing::info!("P2P listener on {}", p2p_addr);
    let listener_task = tokio::spawn(Arc::clone(&engine).listen(p2p_listener, shutdown_rx.clone()));
    let gossip_task = tokio::spawn(Arc::clone(&engine).run_gossip(shutdown_rx));

    let peers = args.peer_urls();
    if !peers.is_empty() {
        let dialer = Arc::clone(&engine);
        tokio::spawn(async move {
            let connected = dialer.connect_all(&peers).await;
            tracing::info!(connected, configured = peers.len(), "initial peers dialed");
        });
    }

    // --- API server ---
    let app_state = api::AppState {
        version: env!("CARGO_PKG_VERSION").to_string(),
        engine: Arc::clone(&engine),
        wallet: Arc::new(wallet),
        balances,
    };
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.http_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {}", api_addr))?;
    tracing::info!("HTTP API listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(MetricsState {
            metrics: Arc::clone(&metrics),
            engine: Arc::clone(&engine),
        });
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = listener_task.await;
    let _ = gossip_task.await;
    persistence.abort();

    db.put_chain(&engine.ledger().snapshot())
        .context("failed to write chain on shutdown")?;
    db.flush().context("failed to flush database")?;
    tracing::info!(len = engine.ledger().len(), "quill-node stopped");
    Ok(())
}

/// Creates the data directory and the node wallet.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("quill_node=info,quill_protocol=info", LogFormat::Pretty);

    let data_dir = &args.data_dir;
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let wallet_path = data_dir.join(WALLET_FILE);
    let wallet = Wallet::load_or_generate(&wallet_path)
        .with_context(|| format!("failed to create wallet at {}", wallet_path.display()))?;

    println!("Node initialized.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Wallet key     : {}", wallet_path.display());
    println!("  Public key     : {}", wallet.public_key_hex());

    Ok(())
}

/// Queries a running node's status endpoint and prints the body.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let body = http_get(&args.http_addr, "/status").await?;
    println!("{}", body);
    Ok(())
}

/// Plain HTTP/1.1 GET over a TCP stream, returning the response body.
async fn http_get(addr: &str, path: &str) -> Result<String> {
    let mut stream = tokio::net::TcpStream::connect(addr)
        .await
        .with_context(|| format!("failed to connect to {}", addr))?;

    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, addr,
    );
    stream.write_all(request.as_bytes()).await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response = String::from_utf8_lossy(&buf);

    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, b)| b.to_string())
        .unwrap_or_else(|| response.to_string());

    Ok(body)
}

fn print_version() {
    println!("quill-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol   {}", quill_protocol::config::PROTOCOL_VERSION);
    println!(
        "hashing    v{}",
        quill_protocol::config::HASH_ENCODING_VERSION
    );
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(%err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(%err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
