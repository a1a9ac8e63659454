//! 商品检索协作服务客户端

use std::time::Duration;

use async_trait::async_trait;

use super::{HttpServiceClient, RetryPolicy, SearchCollaborator};
use crate::error::CollabError;
use crate::model::{RequirementSpec, SearchResults};

pub struct CatalogServiceClient {
    http: HttpServiceClient,
}

impl CatalogServiceClient {
    pub fn new(base_url: &str, timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            http: HttpServiceClient::new(base_url, "catalog-service", timeout, retry),
        }
    }
}

#[async_trait]
impl SearchCollaborator for CatalogServiceClient {
    async fn search(&self, spec: &RequirementSpec) -> Result<SearchResults, CollabError> {
        self.http.post_json("/search", spec).await
    }

    async fn health_check(&self) -> bool {
        self.http.health_check().await
    }
}
