//! 媒体协作服务客户端

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::{HttpServiceClient, MediaCollaborator, RetryPolicy};
use crate::error::CollabError;
use crate::model::{ImageAttributes, MediaReference, TranscriptionResult};

pub struct MediaServiceClient {
    http: HttpServiceClient,
}

#[derive(Serialize)]
struct MediaRequest<'a> {
    storage_key: &'a str,
    content_type: &'a str,
}

impl MediaServiceClient {
    pub fn new(base_url: &str, timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            http: HttpServiceClient::new(base_url, "media-service", timeout, retry),
        }
    }
}

#[async_trait]
impl MediaCollaborator for MediaServiceClient {
    async fn transcribe(&self, media: &MediaReference) -> Result<TranscriptionResult, CollabError> {
        self.http
            .post_json(
                "/transcribe",
                &MediaRequest {
                    storage_key: &media.storage_key,
                    content_type: &media.content_type,
                },
            )
            .await
    }

    async fn extract_image_attributes(
        &self,
        media: &MediaReference,
    ) -> Result<ImageAttributes, CollabError> {
        self.http
            .post_json(
                "/extract-attributes",
                &MediaRequest {
                    storage_key: &media.storage_key,
                    content_type: &media.content_type,
                },
            )
            .await
    }

    async fn health_check(&self) -> bool {
        self.http.health_check().await
    }
}
