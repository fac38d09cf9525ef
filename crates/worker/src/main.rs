use anyhow::Context;
use cosmos_orchestrator::{Orchestrator, OrchestratorConfig};
use cosmos_worker::TickLoop;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// `cosmos-worker` ticks forever; `cosmos-worker --once` ticks once and exits.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = OrchestratorConfig::from_env().context("Invalid orchestrator configuration")?;
    tracing::info!(
        gateway = ?config.gateway,
        max_batch_size = config.max_batch_size,
        tick_interval_secs = config.tick_interval.as_secs(),
        "Loaded configuration"
    );

    let pool = cosmos_db::create_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    cosmos_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    let orchestrator = Orchestrator::new(pool, config.gateway.build(), &config);
    let worker = TickLoop::new(orchestrator, config.tick_interval);

    if std::env::args().any(|a| a == "--once") {
        worker.tick_once().await;
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received SIGINT (Ctrl-C), stopping after the current tick");
        }
        signal_cancel.cancel();
    });

    worker.run(cancel).await;
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "cosmos_worker=debug,cosmos_orchestrator=debug,cosmos_executor=debug".into()
    });

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
