//! TalkShop Server - 对话编排网关
//!
//! 运行方式：
//! ```bash
//! cargo run --bin talkshop-server
//! ```

use std::sync::Arc;
use std::time::Duration;

use talkshop::collab::{CatalogServiceClient, MediaServiceClient, RetryPolicy};
use talkshop::config::load_config;
use talkshop::gateway::{Hub, HubConfig};
use talkshop::inspect::{self, InspectState};
use talkshop::llm::OpenAiDecisionClient;
use talkshop::store::create_session_store;
use talkshop::workflow::{EngineConfig, FlowEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    talkshop::observability::init();

    let cfg = load_config(None).unwrap_or_default();

    let store = create_session_store(
        cfg.session.db_path.as_deref(),
        chrono::Duration::hours(cfg.session.ttl_hours),
    )
    .await;

    let llm = Arc::new(OpenAiDecisionClient::new(
        cfg.llm.base_url.as_deref(),
        &cfg.llm.model,
        None,
    ));

    let timeout = Duration::from_secs(cfg.collaborators.timeout_secs);
    let retry = RetryPolicy {
        max_attempts: cfg.collaborators.max_attempts,
        ..RetryPolicy::default()
    };
    let media = Arc::new(MediaServiceClient::new(
        &cfg.collaborators.media_url,
        timeout,
        retry.clone(),
    ));
    let catalog = Arc::new(CatalogServiceClient::new(
        &cfg.collaborators.catalog_url,
        timeout,
        retry,
    ));

    let engine = Arc::new(FlowEngine::new(
        Arc::clone(&store),
        llm,
        media.clone(),
        catalog.clone(),
        EngineConfig::default(),
    ));

    let hub_config = HubConfig {
        bind_addr: cfg.server.ws_bind.clone(),
        max_connections: cfg.server.max_connections,
        heartbeat_interval: cfg.server.heartbeat_interval_secs,
        ..HubConfig::default()
    };
    let hub = Hub::new(hub_config, Arc::clone(&store), engine);

    let inspect_state = InspectState {
        store,
        registry: hub.registry(),
        media,
        catalog,
    };
    let http_bind = cfg.server.http_bind.clone();
    tokio::spawn(async move {
        if let Err(e) = inspect::serve(&http_bind, inspect_state).await {
            tracing::error!("Inspect surface terminated: {}", e);
        }
    });

    tracing::info!("Starting TalkShop hub on ws://{}", cfg.server.ws_bind);
    tracing::info!("Press Ctrl+C to stop");

    hub.start().await.map_err(|e| anyhow::anyhow!(e))?;

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down hub...");
    hub.stop().await;

    Ok(())
}
