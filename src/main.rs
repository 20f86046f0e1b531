use std::sync::Arc;

use axum::Router;
use mcp_tool_validation::{
    clock::SystemClock,
    config::{Config, StoreBackend},
    db::connect_and_bootstrap,
    handlers::router,
    manager::FlowStateManager,
    state::AppState,
    store::{FlowStore, MemoryFlowStore, SqliteFlowStore},
    sweeper::start_sweep_worker,
    webhook::{WebhookTarget, start_webhook_worker},
};
use reqwest::Client;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,mcp_tool_validation=info".to_string()),
        )
        .json()
        .init();

    let config = Config::from_env();

    let store: Arc<dyn FlowStore> = match config.store_backend {
        StoreBackend::Sqlite => Arc::new(SqliteFlowStore::new(
            connect_and_bootstrap(&config.database_url).await?,
        )),
        StoreBackend::Memory => {
            warn!("using in-memory flow store; flows do not survive restarts");
            Arc::new(MemoryFlowStore::new())
        }
    };

    let mut manager = FlowStateManager::new(store, Arc::new(SystemClock));
    if let Some(endpoint) = config.completion_webhook_url.clone() {
        let (tx, rx) = mpsc::unbounded_channel();
        manager = manager.with_event_sink(tx);
        start_webhook_worker(
            WebhookTarget {
                endpoint,
                secret: config.completion_webhook_secret.clone(),
                max_retries: config.webhook_max_retries,
            },
            Client::builder().build()?,
            rx,
        );
    }

    let state = AppState {
        config: config.clone(),
        flows: Arc::new(manager),
    };

    start_sweep_worker(state.clone());

    let app: Router = router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(bind_addr = %config.bind_addr, "tool validation service listening");

    axum::serve(listener, app).await?;
    Ok(())
}
