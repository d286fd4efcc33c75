use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use gateway::auth::TokenValidator;
use gateway::cache::Cache;
use gateway::circuit_breaker::CircuitBreakerRegistry;
use gateway::config::{self, Config};
use gateway::proxy::ProxyEngine;
use gateway::rate_limit::IpRateLimiter;
use gateway::upstream::UpstreamClient;
use gateway::web::{AppState, build_router};

/// CLI flags mirroring the teacher's `Cli` struct shape
/// (`crates/m3u-proxy/src/main.rs`): a config-ish path flag, a log
/// level, and a port override, adapted to this crate's `routes.yml`
/// instead of a database config file.
#[derive(Parser)]
#[command(name = "gateway")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "HTTP API gateway: routing, caching, circuit breaking, auth")]
struct Cli {
    /// Path to the route table file.
    #[arg(long, default_value = "routes.yml")]
    routes: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Listening port (overrides config/env).
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("gateway={}", cli.log_level)));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut app_config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };
    if let Some(port) = cli.port {
        app_config.web.port = port;
    }
    info!("configuration loaded");

    let route_table = match config::load_route_table(&cli.routes) {
        Ok(table) => table,
        Err(e) => {
            error!(error = %e, routes_file = %cli.routes, "failed to load route table");
            std::process::exit(1);
        }
    };
    info!(routes_file = %cli.routes, "route table loaded");

    let redis_connection_manager = match redis::Client::open(app_config.redis.connection_url()) {
        Ok(client) => match client.get_connection_manager().await {
            Ok(manager) => Some(manager),
            Err(e) => {
                warn!(error = %e, "redis unavailable at startup; running with cache degraded to local-only");
                None
            }
        },
        Err(e) => {
            warn!(error = %e, "invalid redis connection url; running without remote cache");
            None
        }
    };

    let cache = Cache::new(&app_config.cache, redis_connection_manager.clone());
    let breakers = Arc::new(CircuitBreakerRegistry::new(3, std::time::Duration::from_secs(app_config.circuit_breaker.reset_timeout_secs)));
    let upstream = UpstreamClient::new(&app_config.upstream, breakers.clone())?;
    let proxy = Arc::new(ProxyEngine::new(route_table, cache, upstream));

    let token_validator = Arc::new(TokenValidator::new(&app_config.jwt));
    let rate_limiter = Arc::new(IpRateLimiter::new(&app_config.rate_limit));
    let probe_client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()?;

    let state = AppState {
        proxy,
        breakers,
        token_validator,
        rate_limiter,
        redis: redis_connection_manager,
        probe_client,
        rate_limit_config: Arc::new(app_config.rate_limit.clone()),
    };

    let router = build_router(state, &app_config).into_make_service_with_connect_info::<std::net::SocketAddr>();

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], app_config.web.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "gateway listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
