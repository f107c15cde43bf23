// ABOUTME: Entry point for the gateway binary — wires config, store, auth, the agent manager's
// ABOUTME: heartbeat watchdog, and both public surfaces (tonic gRPC + axum HTTP) into one process.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tonic::transport::Server as TonicServer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use coven_gateway::auth::middleware::{AuthState, GrpcAuthInterceptor};
use coven_gateway::auth::token::TokenSigner;
use coven_gateway::broker::Broker;
use coven_gateway::config::Config;
use coven_gateway::dedupe::DedupeCache;
use coven_gateway::grpc::{AdminServiceImpl, ClientServiceImpl, CovenControlImpl};
use coven_gateway::http::{build_router, AppState};
use coven_gateway::manager::AgentManager;
use coven_gateway::pb::admin_service_server::AdminServiceServer;
use coven_gateway::pb::client_service_server::ClientServiceServer;
use coven_gateway::pb::coven_control_server::CovenControlServer;
use coven_gateway::router::Router;
use coven_gateway::store::Store;

#[derive(Parser, Debug)]
#[command(name = "coven-gateway", about = "Multi-frontend agent gateway")]
struct Cli {
    /// Path to the TOML config file. Created with defaults on first run.
    #[arg(long, default_value = "config.toml")]
    config: String,

    /// Override the gRPC listen address from the config file.
    #[arg(long)]
    grpc_addr: Option<String>,

    /// Override the HTTP listen address from the config file.
    #[arg(long)]
    http_addr: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(&cli.config).context("failed to load configuration")?;
    if let Some(addr) = cli.grpc_addr {
        config.grpc_addr = addr;
    }
    if let Some(addr) = cli.http_addr {
        config.http_addr = addr;
    }

    tracing::info!(
        grpc_addr = %config.grpc_addr,
        http_addr = %config.http_addr,
        db_path = %config.db_path,
        "configuration loaded"
    );

    let signing_secret = config
        .signing_secret(&cli.config)
        .context("failed to resolve token signing secret")?;
    let signer = TokenSigner::new(signing_secret.into_bytes());

    let store = Store::open(&config.db_path).context("failed to open store")?;

    let manager = AgentManager::new(config.heartbeat.clone(), config.broker.pending_channel_capacity);
    manager.clone().spawn_heartbeat_watchdog();

    let router = Router::new(store.clone(), Arc::clone(&manager));
    let dedupe = DedupeCache::new(Duration::from_secs(config.broker.dedupe_ttl_secs));
    let broker = Arc::new(Broker::new(
        store.clone(),
        Arc::clone(&manager),
        router,
        dedupe,
        Duration::from_secs(config.broker.request_timeout_secs),
    ));

    let auth_state = Arc::new(AuthState::new(store.clone(), signer.clone()));

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install prometheus recorder")?;

    let http_state = AppState {
        store: store.clone(),
        manager: Arc::clone(&manager),
        broker: Arc::clone(&broker),
    };
    let http_router = build_router(http_state, Arc::clone(&auth_state), prometheus_handle);

    let http_addr = config.http_addr.clone();
    let http_task = tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(&http_addr)
            .await
            .with_context(|| format!("failed to bind HTTP address {http_addr}"))?;
        tracing::info!(addr = %http_addr, "HTTP server listening");
        axum::serve(listener, http_router)
            .await
            .context("HTTP server failed")
    });

    let grpc_addr: std::net::SocketAddr = config
        .grpc_addr
        .parse()
        .with_context(|| format!("invalid gRPC address {}", config.grpc_addr))?;

    let interceptor = GrpcAuthInterceptor {
        auth: Arc::clone(&auth_state),
    };
    let coven_service = CovenControlServer::with_interceptor(
        CovenControlImpl::new(store.clone(), Arc::clone(&manager)),
        interceptor.clone(),
    );
    let admin_service = AdminServiceServer::with_interceptor(
        AdminServiceImpl::new(store.clone(), signer.clone()),
        interceptor.clone(),
    );
    let client_service = ClientServiceServer::with_interceptor(
        ClientServiceImpl::new(store.clone(), Arc::clone(&manager), Arc::clone(&broker)),
        interceptor,
    );

    let grpc_task = tokio::spawn(async move {
        tracing::info!(addr = %grpc_addr, "gRPC server listening");
        TonicServer::builder()
            .add_service(coven_service)
            .add_service(admin_service)
            .add_service(client_service)
            .serve(grpc_addr)
            .await
            .context("gRPC server failed")
    });

    tokio::select! {
        result = http_task => result.context("HTTP server task panicked")??,
        result = grpc_task => result.context("gRPC server task panicked")??,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    Ok(())
}
