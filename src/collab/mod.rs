//! 协作服务客户端
//!
//! 媒体处理与商品检索两个 HTTP 协作方的带重试客户端。统一约定：
//! 单次请求 30 秒超时，至多 3 次尝试，指数退避 1s/2s/4s；仅对
//! 超时 / 连接失败 / 5xx 重试，4xx 一律视为终态拒绝。重试耗尽抛
//! CollaboratorUnavailable，由调用节点决定致命或非致命。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CollabError;
use crate::model::{ImageAttributes, MediaReference, RequirementSpec, SearchResults, TranscriptionResult};

mod catalog;
mod media;

pub use catalog::CatalogServiceClient;
pub use media::MediaServiceClient;

/// 媒体协作服务接口（转写 / 图像属性抽取）
#[async_trait]
pub trait MediaCollaborator: Send + Sync {
    async fn transcribe(&self, media: &MediaReference) -> Result<TranscriptionResult, CollabError>;

    async fn extract_image_attributes(
        &self,
        media: &MediaReference,
    ) -> Result<ImageAttributes, CollabError>;

    async fn health_check(&self) -> bool;
}

/// 检索协作服务接口
#[async_trait]
pub trait SearchCollaborator: Send + Sync {
    async fn search(&self, spec: &RequirementSpec) -> Result<SearchResults, CollabError>;

    async fn health_check(&self) -> bool;
}

/// 重试参数
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

/// HTTP 基础客户端，两个协作方客户端共用
pub(crate) struct HttpServiceClient {
    client: Client,
    base_url: String,
    service: &'static str,
    retry: RetryPolicy,
}

impl HttpServiceClient {
    pub fn new(base_url: &str, service: &'static str, timeout: Duration, retry: RetryPolicy) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service,
            retry,
        }
    }

    /// POST JSON，按策略重试可恢复失败
    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, CollabError> {
        let url = format!("{}{}", self.base_url, path);
        let mut backoff = self.retry.initial_backoff;
        let mut last_reason = String::new();

        for attempt in 1..=self.retry.max_attempts {
            match self.client.post(&url).json(body).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp.json::<T>().await.map_err(|e| CollabError::BadResponse {
                            service: self.service,
                            reason: e.to_string(),
                        });
                    }
                    if status.is_client_error() {
                        let detail = resp.text().await.unwrap_or_default();
                        return Err(CollabError::Rejected {
                            service: self.service,
                            reason: format!("HTTP {}: {}", status, detail),
                        });
                    }
                    // 5xx：可重试
                    last_reason = format!("HTTP {}", status);
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    last_reason = e.to_string();
                }
                Err(e) => {
                    return Err(CollabError::BadResponse {
                        service: self.service,
                        reason: e.to_string(),
                    });
                }
            }

            if attempt < self.retry.max_attempts {
                tracing::warn!(
                    service = self.service,
                    attempt,
                    backoff_secs = backoff.as_secs(),
                    reason = %last_reason,
                    "Collaborator call failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }

        Err(CollabError::Unavailable {
            service: self.service,
            attempts: self.retry.max_attempts,
            reason: last_reason,
        })
    }

    /// GET /health，5 秒内 200 视为健康
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::warn!(service = self.service, error = %e, "Health check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};

    use super::*;

    async fn spawn_server(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{}", addr)
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(5),
        }
    }

    fn client(base: &str) -> HttpServiceClient {
        HttpServiceClient::new(base, "test-service", Duration::from_secs(5), fast_retry())
    }

    #[tokio::test]
    async fn retries_5xx_until_success() {
        let hits = Arc::new(AtomicU32::new(0));
        let hits_handler = Arc::clone(&hits);
        let app = Router::new().route(
            "/echo",
            post(move || {
                let hits = Arc::clone(&hits_handler);
                async move {
                    if hits.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(StatusCode::SERVICE_UNAVAILABLE)
                    } else {
                        Ok(Json(serde_json::json!({"ok": true})))
                    }
                }
            }),
        );
        let base = spawn_server(app).await;

        let value: serde_json::Value = client(&base)
            .post_json("/echo", &serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(value["ok"], true);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_error_is_terminal() {
        let hits = Arc::new(AtomicU32::new(0));
        let hits_handler = Arc::clone(&hits);
        let app = Router::new().route(
            "/echo",
            post(move || {
                let hits = Arc::clone(&hits_handler);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    StatusCode::UNPROCESSABLE_ENTITY
                }
            }),
        );
        let base = spawn_server(app).await;

        let result: Result<serde_json::Value, _> =
            client(&base).post_json("/echo", &serde_json::json!({})).await;

        assert!(matches!(result, Err(CollabError::Rejected { .. })));
        // 4xx 不重试
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_yield_unavailable() {
        let app = Router::new().route(
            "/echo",
            post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let base = spawn_server(app).await;

        let result: Result<serde_json::Value, _> =
            client(&base).post_json("/echo", &serde_json::json!({})).await;

        match result {
            Err(CollabError::Unavailable { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected unavailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn health_check_false_when_unreachable() {
        // 未监听的端口
        let client = client("http://127.0.0.1:1");
        assert!(!client.health_check().await);
    }
}
