//! 只读检查面
//!
//! 独立于 WebSocket 网关的 HTTP 端口：健康度（活动连接数 + 协作方
//! 健康布尔）与会话摘要查询，供运维与调试使用，不暴露写操作。

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::collab::{MediaCollaborator, SearchCollaborator};
use crate::error::StoreError;
use crate::gateway::ConnectionRegistry;
use crate::model::SessionSummary;
use crate::store::SessionStore;

#[derive(Clone)]
pub struct InspectState {
    pub store: Arc<dyn SessionStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub media: Arc<dyn MediaCollaborator>,
    pub catalog: Arc<dyn SearchCollaborator>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_connections: usize,
    pub collaborators: CollaboratorHealth,
}

#[derive(Debug, Serialize)]
pub struct CollaboratorHealth {
    pub media: bool,
    pub catalog: bool,
}

pub fn router(state: InspectState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sessions/:session_id", get(get_session))
        .with_state(state)
}

/// 在配置地址上启动检查面
pub async fn serve(bind_addr: &str, state: InspectState) -> Result<(), String> {
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|e| format!("Failed to bind inspect surface: {}", e))?;
    tracing::info!("Inspect surface listening on http://{}", bind_addr);
    axum::serve(listener, router(state))
        .await
        .map_err(|e| e.to_string())
}

async fn health(State(state): State<InspectState>) -> Json<HealthResponse> {
    let (media_ok, catalog_ok) =
        tokio::join!(state.media.health_check(), state.catalog.health_check());
    Json(HealthResponse {
        status: "ok",
        active_connections: state.registry.count().await,
        collaborators: CollaboratorHealth {
            media: media_ok,
            catalog: catalog_ok,
        },
    })
}

async fn get_session(
    State(state): State<InspectState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionSummary>, StatusCode> {
    match state.store.get(&session_id).await {
        Ok(session) => {
            let connected = state.registry.is_connected(&session_id).await;
            Ok(Json(session.summary(connected)))
        }
        Err(StoreError::NotFound(_)) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!(session_id = %session_id, error = %e, "Session lookup failed");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}
