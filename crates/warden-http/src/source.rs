use async_trait::async_trait;
use serde::Deserialize;
use warden_core::observability::targets;
use warden_core::{CoreError, RouteDescriptor, RouteSource};

use crate::client::HttpClient;

/// 路由接口可能返回的两种形态：裸数组或 `{ "data": [...] }` 包络。
#[derive(Deserialize)]
#[serde(untagged)]
enum RoutesPayload {
    Bare(Vec<RouteDescriptor>),
    Envelope { data: Vec<RouteDescriptor> },
}

/// 通过 HTTP 拉取当前用户可见的路由描述。
#[derive(Clone, Debug)]
pub struct HttpRouteSource {
    client: HttpClient,
    path: String,
}

impl HttpRouteSource {
    pub fn new(client: HttpClient, path: impl Into<String>) -> Self {
        Self {
            client,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl RouteSource for HttpRouteSource {
    async fn fetch_routes(&self) -> warden_core::Result<Vec<RouteDescriptor>> {
        let payload: RoutesPayload = self
            .client
            .get_json(&self.path)
            .await
            .map_err(CoreError::from)?;
        let routes = match payload {
            RoutesPayload::Bare(routes) | RoutesPayload::Envelope { data: routes } => routes,
        };
        tracing::debug!(target: targets::HTTP, path = %self.path, count = routes.len(), "fetched route descriptors");
        Ok(routes)
    }
}

