use std::net::SocketAddr;
use std::sync::Arc;

use stayplan_scheduler::{Clock, JobSink, ScheduleStore, SchedulerEngine, SystemClock};
use tracing::info;

mod app;
mod http;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "stayplan_gateway=info,stayplan_scheduler=info,tower_http=debug".into()
            }),
        )
        .init();

    // load config: STAYPLAN_CONFIG env > ~/.stayplan/stayplan.toml
    let config_path = std::env::var("STAYPLAN_CONFIG").ok();
    let config =
        stayplan_core::StayplanConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
            tracing::warn!(code = e.code(), "Config load failed ({}), using defaults", e);
            stayplan_core::StayplanConfig::default()
        });

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL;")?;
    stayplan_scheduler::db::init_db(&db)?;
    info!("database migrations complete");

    // HTTP handlers and the engine each get their own connection.
    let api_store = Arc::new(ScheduleStore::new(rusqlite::Connection::open(db_path)?)?);
    let engine_store = Arc::new(ScheduleStore::new(rusqlite::Connection::open(db_path)?)?);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let sink: Arc<dyn JobSink> = Arc::from(stayplan_scheduler::sink::from_config(&config.sink));
    let engine = SchedulerEngine::new(engine_store, sink, clock.clone(), &config.scheduler);

    let state = Arc::new(app::AppState::new(config, api_store, clock));
    let router = app::build_router(state);

    // spawn scheduler engine loop in background
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine_task = tokio::spawn(engine.run(shutdown_rx));

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!(build = env!("STAYPLAN_GIT_SHA"), "Stayplan gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;

    // signal scheduler to stop
    let _ = shutdown_tx.send(true);
    let _ = engine_task.await;
    Ok(())
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
