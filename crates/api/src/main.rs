use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use cosmos_api::config::ServerConfig;
use cosmos_api::router::build_app_router;
use cosmos_api::state::AppState;
use cosmos_orchestrator::{Orchestrator, OrchestratorConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    // --- Configuration ---
    let server_config = ServerConfig::from_env().context("Invalid server configuration")?;
    let config = OrchestratorConfig::from_env().context("Invalid orchestrator configuration")?;
    tracing::info!(
        host = %server_config.host,
        port = server_config.port,
        gateway = ?config.gateway,
        max_batch_size = config.max_batch_size,
        "Loaded configuration"
    );

    // --- Database ---
    let pool = cosmos_db::create_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    cosmos_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    cosmos_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database ready");

    // --- Orchestrator ---
    let orchestrator = Orchestrator::new(pool, config.gateway.build(), &config);

    let state = AppState {
        orchestrator,
        config: Arc::new(server_config.clone()),
    };
    let app = build_app_router(state, &server_config);

    // --- Start server ---
    let host = server_config
        .host
        .parse()
        .with_context(|| format!("Invalid HOST address '{}'", server_config.host))?;
    let addr = SocketAddr::new(host, server_config.port);
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cosmos_api=debug,cosmos_orchestrator=debug,cosmos_executor=debug,tower_http=debug".into());

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for SIGINT or SIGTERM.
///
/// A tick already running in a detached task is not awaited; the next
/// tick from any process recovers whatever it left behind.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
