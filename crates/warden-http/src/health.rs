use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use warden_connection::HealthProbe;
use warden_core::{ConnectionConfig, CoreError};

use crate::client::{HttpClient, HttpRequest, HttpTransport, Method, resolve_url};
use crate::error::HttpError;

/// 通过 `GET <health_path>` 判断后端健康的探测器。
///
/// 直接持有传输而不是 [`HttpClient`]：客户端的连接前置检查会反过来触发重连，
/// 重连又依赖本探测器，二者相互持有会形成引用环。
pub struct HttpHealthProbe {
    transport: Arc<dyn HttpTransport>,
    url: String,
    timeout: Duration,
}

impl HttpHealthProbe {
    pub fn new(transport: Arc<dyn HttpTransport>, base_url: &str, config: &ConnectionConfig) -> Self {
        Self {
            transport,
            url: resolve_url(base_url, &config.health_path),
            timeout: config.probe_timeout(),
        }
    }

    /// 复用客户端的传输与基础地址。
    pub fn for_client(client: &HttpClient, config: &ConnectionConfig) -> Self {
        Self::new(client.transport(), client.base_url(), config)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self) -> warden_core::Result<()> {
        let request = HttpRequest {
            method: Method::GET,
            url: self.url.clone(),
            headers: Vec::new(),
            body: None,
            timeout: self.timeout,
        };
        let response = self.transport.execute(request).await.map_err(CoreError::from)?;
        if response.is_success() {
            Ok(())
        } else {
            Err(HttpError::Status {
                status: response.status,
                message: "health endpoint reported failure".into(),
            }
            .into())
        }
    }
}
