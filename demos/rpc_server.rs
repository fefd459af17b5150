//! Standalone RPC server backed by the in-memory engine.
//!
//! Demonstrates:
//! - Building a connection with a throttle policy and a durable store
//! - Registering client packages
//! - Serving the connection over WebSocket until Ctrl+C
//!
//! Usage:
//!   cargo run --example rpc_server
//!   cargo run --example rpc_server -- --debug
//!   cargo run --example rpc_server -- --port 9222 --store ./throttle-state
//!   cargo run --example rpc_server -- --policy ./policy.json

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use anyhow::Context;
use customtabs_connection::engine::{MemoryPlatform, Platform};
use customtabs_connection::throttle::JsonFileThrottleStore;
use customtabs_connection::{CustomTabsConnection, RpcServer, ThrottlePolicy, Uid};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_PORT: u16 = 9222;

/// Packages accepted in `hello`.
const CLIENTS: &[(u32, &str)] = &[
    (10_001, "com.example.reader"),
    (10_002, "com.example.news"),
];

// ============================================================================
// Types
// ============================================================================

/// Command-line arguments.
#[derive(Debug, Clone)]
struct Args {
    debug: bool,
    port: u16,
    store: Option<String>,
    policy: Option<String>,
}

impl Args {
    fn parse() -> anyhow::Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        let value_of = |flag: &str| {
            args.iter()
                .position(|a| a == flag)
                .and_then(|i| args.get(i + 1))
                .cloned()
        };

        let port = match value_of("--port") {
            Some(raw) => raw.parse().context("--port expects a number")?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            debug: args.iter().any(|a| a == "--debug"),
            port,
            store: value_of("--store"),
            policy: value_of("--policy"),
        })
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("\n[ERROR] {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse()?;
    init_logging(args.debug);

    println!("=== Custom Tabs RPC server ===\n");

    // ========================================================================
    // Engine
    // ========================================================================

    let engine = Arc::new(MemoryPlatform::new());
    for &(uid, package) in CLIENTS {
        engine.register_package(Uid::new(uid), package);
        println!("    client {uid} = {package}");
    }

    // ========================================================================
    // Connection
    // ========================================================================

    let policy = match &args.policy {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading policy {path}"))?;
            ThrottlePolicy::from_json(&json)?
        }
        None => ThrottlePolicy::default(),
    };

    let mut builder = CustomTabsConnection::builder()
        .platform(Platform::in_memory(Arc::clone(&engine)))
        .throttle_policy(policy);

    if let Some(dir) = &args.store {
        builder = builder.throttle_store(Arc::new(JsonFileThrottleStore::open(dir)?));
        println!("    throttle state in {dir}");
    }

    let connection = builder.build()?;

    // ========================================================================
    // Server
    // ========================================================================

    let server = RpcServer::bind(
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        args.port,
        connection.clone(),
        engine,
    )
    .await?;

    println!("\n    listening on {}", server.ws_url());
    let handle = server.spawn();

    println!("Press Ctrl+C to exit...");
    tokio::signal::ctrl_c().await.ok();

    handle.shutdown().await;
    connection.shutdown().await;
    println!("    ✓ stopped");

    Ok(())
}

fn init_logging(debug: bool) {
    let filter = if debug {
        "customtabs_connection=debug"
    } else {
        "customtabs_connection=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}
