//! Replica Tiles - A map tile server over redundant PostgreSQL replicas.
//!
//! This binary probes the replicas, then starts the HTTP server.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use replica_tiles::{
    backend::{redact_address, PgBackend, TileBackend},
    config::{Cli, Command, ProbeCommandConfig, ServeConfig, TileSourceConfig},
    server::{create_router, RouterConfig},
    tile::{ProbeFailurePolicy, TileService},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config).await,
        Command::Probe(config) => run_probe(config).await,
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Replica Tiles v{}", env!("CARGO_PKG_VERSION"));
    log_source_config(&config.source);

    let service = match start_service(&config.source).await {
        Some(service) => Arc::new(service),
        None => return ExitCode::FAILURE,
    };

    let router = create_router(Arc::clone(&service), build_router_config(&config));
    let addr = config.bind_address();

    info!("");
    info!("────────────────────────────────────────────────────────────────");
    info!("  Server listening on: http://{}", addr);
    info!("");
    info!("  Try these endpoints:");
    info!("    curl http://{}/health", addr);
    info!("    curl http://{}/metadata", addr);
    info!(
        "    curl http://{}/tiles/{}/0/0.{}",
        addr,
        config.source.minzoom,
        service.format().content_type.format_name()
    );
    info!("────────────────────────────────────────────────────────────────");
    info!("");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            service.shutdown().await;
            return ExitCode::FAILURE;
        }
    };

    let result = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    info!("Closing replica pools");
    service.shutdown().await;

    if let Err(e) = result {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Resolve once Ctrl-C is received.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn log_source_config(source: &TileSourceConfig) {
    info!("Configuration:");
    for (url, capacity) in source.replica_capacities() {
        info!("  Replica: {} (capacity {})", redact_address(&url), capacity);
    }
    info!("  Zoom range: {}..={}", source.minzoom, source.maxzoom);
    info!("  Canary: {}", source.canary);
    if source.probe_failure == ProbeFailurePolicy::Exclude {
        info!("  Replicas failing the probe will be excluded");
    }
    if source.errors_as_empty {
        warn!("  Lookup failures will be served as missing tiles");
    }
}

/// Create the replica backends and run startup negotiation.
///
/// Errors are logged; `None` means startup failed.
async fn start_service(source: &TileSourceConfig) -> Option<TileService<PgBackend>> {
    let mut replicas = Vec::with_capacity(source.replicas.len());
    for (url, capacity) in source.replica_capacities() {
        match PgBackend::connect_lazy(&url, capacity, source.query.as_str()) {
            Ok(backend) => replicas.push((backend, capacity)),
            Err(e) => {
                error!("Invalid replica {}: {}", redact_address(&url), e);
                for (backend, _) in &replicas {
                    backend.close().await;
                }
                return None;
            }
        }
    }

    info!("Probing {} replica(s)...", replicas.len());
    match TileService::start(replicas, source.service_config()).await {
        Ok(service) => Some(service),
        Err(e) => {
            error!("Startup negotiation failed: {}", e);
            None
        }
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "replica_tiles=debug,tower_http=debug,sqlx=info"
    } else {
        "replica_tiles=info,tower_http=info,sqlx=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Build RouterConfig from the application ServeConfig.
fn build_router_config(config: &ServeConfig) -> RouterConfig {
    let mut router_config = RouterConfig::new().with_cache_max_age(config.cache_max_age);

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config.with_tracing(!config.no_tracing)
}

// =============================================================================
// Probe Command
// =============================================================================

async fn run_probe(config: ProbeCommandConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.source.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let Some(service) = start_service(&config.source).await else {
        return ExitCode::FAILURE;
    };

    let replicas: Vec<_> = service
        .dispatcher()
        .endpoints()
        .iter()
        .map(|endpoint| {
            serde_json::json!({
                "address": endpoint.address(),
                "capacity": endpoint.capacity(),
            })
        })
        .collect();

    let output = serde_json::json!({
        "replicas": replicas,
        "format": service.format(),
        "metadata": service.metadata(),
    });

    service.shutdown().await;

    match serde_json::to_string_pretty(&output) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: failed to encode result: {}", e);
            ExitCode::FAILURE
        }
    }
}
