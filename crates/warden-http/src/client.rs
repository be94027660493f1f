use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use warden_connection::ConnectionManager;
use warden_core::observability::targets;
use warden_core::{CredentialStore, HttpConfig};

use crate::error::HttpError;
use crate::transfer::{TransferError, TransferHandle, TransferKind, TransferManager};

pub use reqwest::Method;

/// 缓冲式响应体拆块时的默认块大小。
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

const ERROR_BODY_LIMIT: usize = 256;

/// 交给传输层执行的完整请求。
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub timeout: Duration,
}

/// 已完整读取的响应。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 大小写不敏感地查找响应头。
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        serde_json::from_slice(&self.body).map_err(|err| HttpError::Decode(err.to_string()))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// 逐块读取的响应体。
#[async_trait]
pub trait BodyStream: Send {
    /// 响应声明的总长度。
    fn content_length(&self) -> Option<u64>;

    /// 读取下一块；`None` 表示读取完毕。
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, HttpError>;
}

/// 已打开但尚未读取响应体的流式响应。
pub struct StreamingResponse {
    pub status: u16,
    pub body: Box<dyn BodyStream>,
}

/// 把完整缓冲区按固定大小切块的 [`BodyStream`]。
pub struct BufferedBody {
    data: Vec<u8>,
    offset: usize,
    chunk_size: usize,
}

impl BufferedBody {
    pub fn new(data: Vec<u8>, chunk_size: usize) -> Self {
        Self {
            data,
            offset: 0,
            chunk_size: chunk_size.max(1),
        }
    }
}

#[async_trait]
impl BodyStream for BufferedBody {
    fn content_length(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, HttpError> {
        if self.offset >= self.data.len() {
            return Ok(None);
        }
        let end = (self.offset + self.chunk_size).min(self.data.len());
        let chunk = self.data[self.offset..end].to_vec();
        self.offset = end;
        Ok(Some(chunk))
    }
}

/// HTTP 传输契约。
///
/// # 教案式说明
/// - **意图 (Why)**：请求层的鉴权、超时、错误归一化与传输实现无关；把“发出请求”抽象为 trait，
///   生产环境使用 [`ReqwestTransport`]，测试注入脚本化实现即可覆盖全部错误分支。
/// - **契约 (What)**：
///   - `execute` 只负责收发，不判断状态码；非 2xx 响应也以 `Ok` 返回；
///   - `open_stream` 默认退化为一次性读取后切块，支持真正流式读取的实现应覆盖它。
#[async_trait]
pub trait HttpTransport: Send + Sync + 'static {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;

    async fn open_stream(&self, request: HttpRequest) -> Result<StreamingResponse, HttpError> {
        let response = self.execute(request).await?;
        Ok(StreamingResponse {
            status: response.status,
            body: Box::new(BufferedBody::new(response.body, DEFAULT_CHUNK_SIZE)),
        })
    }
}

/// 基于 `reqwest` 的生产传输。
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &HttpConfig) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|err| HttpError::InvalidRequest(format!("failed to build client: {err}")))?;
        Ok(Self { client })
    }

    async fn send(&self, request: HttpRequest) -> Result<reqwest::Response, HttpError> {
        let timeout = request.timeout;
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .timeout(timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        builder
            .send()
            .await
            .map_err(|err| HttpError::from_reqwest(err, timeout))
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let timeout = request.timeout;
        let response = self.send(request).await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_owned(), value.to_owned()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|err| HttpError::from_reqwest(err, timeout))?
            .to_vec();
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn open_stream(&self, request: HttpRequest) -> Result<StreamingResponse, HttpError> {
        let timeout = request.timeout;
        let response = self.send(request).await?;
        Ok(StreamingResponse {
            status: response.status().as_u16(),
            body: Box::new(ReqwestBody { response, timeout }),
        })
    }
}

struct ReqwestBody {
    response: reqwest::Response,
    timeout: Duration,
}

#[async_trait]
impl BodyStream for ReqwestBody {
    fn content_length(&self) -> Option<u64> {
        self.response.content_length()
    }

    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, HttpError> {
        let chunk = self
            .response
            .chunk()
            .await
            .map_err(|err| HttpError::from_reqwest(err, self.timeout))?;
        Ok(chunk.map(|bytes| bytes.to_vec()))
    }
}

/// 单次请求的可选项。
#[derive(Clone, Debug, Default)]
pub struct RequestConfig {
    /// 覆盖客户端默认超时。
    pub timeout: Option<Duration>,
    pub headers: Vec<(String, String)>,
    /// 不附带 `Authorization` 头（登录、健康检查等公开接口）。
    pub skip_auth: bool,
    /// 跳过连接管理器的前置检查。
    pub skip_connection_check: bool,
}

impl RequestConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn anonymous(mut self) -> Self {
        self.skip_auth = true;
        self
    }

    pub fn without_connection_check(mut self) -> Self {
        self.skip_connection_check = true;
        self
    }
}

/// 带鉴权与连通性感知的 HTTP 客户端。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 所有业务请求共享同一套规则：拼接基础地址、附带 Bearer 令牌、断线时先尝试恢复连接、
///   非 2xx 响应与传输故障统一归入 [`HttpError`] 分类；
/// - 路由拉取、健康检查与文件传输都基于它构建，调用方无需重复处理这些横切关注点。
///
/// ## 逻辑 (How)
/// - `prepare` 负责连接前置检查、地址解析与请求头组装；
/// - `send` 在传输调用外再包一层 `tokio::time::timeout`，确保即使传输实现不遵守超时也能按时返回；
/// - 下载按块读取，每块之间经过 [`TransferHandle`] 的检查点，暂停与取消在块边界生效。
///
/// ## 契约 (What)
/// - 仅 2xx 视为成功；其余状态码返回 [`HttpError::Status`]，响应体截断后放入错误消息；
/// - 设置了连接管理器时，`ensure_connected` 失败会返回 [`HttpError::Unavailable`] 而不发出请求。
#[derive(Clone)]
pub struct HttpClient {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    default_timeout: Duration,
    credentials: Option<Arc<dyn CredentialStore>>,
    connection: Option<ConnectionManager>,
    transfers: TransferManager,
}

impl HttpClient {
    pub fn new(config: &HttpConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            default_timeout: config.timeout(),
            credentials: None,
            connection: None,
            transfers: TransferManager::new(),
        }
    }

    /// 使用 `reqwest` 传输构造客户端。
    pub fn with_reqwest(config: &HttpConfig) -> Result<Self, HttpError> {
        let transport = ReqwestTransport::new(config)?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_connection(mut self, connection: ConnectionManager) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn transport(&self) -> Arc<dyn HttpTransport> {
        Arc::clone(&self.transport)
    }

    pub fn transfers(&self) -> &TransferManager {
        &self.transfers
    }

    /// 发送请求，`payload` 以 JSON 编码。
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        payload: Option<&serde_json::Value>,
        config: RequestConfig,
    ) -> Result<HttpResponse, HttpError> {
        let body = payload
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|err| HttpError::InvalidRequest(err.to_string()))?
            .map(|bytes| (bytes, "application/json"));
        self.send(method, path, body, &config).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, HttpError> {
        self.request(Method::GET, path, None, RequestConfig::default())
            .await?
            .json()
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, HttpError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let bytes =
            serde_json::to_vec(body).map_err(|err| HttpError::InvalidRequest(err.to_string()))?;
        self.send(
            Method::POST,
            path,
            Some((bytes, "application/json")),
            &RequestConfig::default(),
        )
        .await?
        .json()
    }

    /// 登记一个下载任务，调用 [`download`](Self::download) 后开始执行。
    pub fn start_download(&self, path: impl Into<String>) -> TransferHandle {
        self.transfers.create(TransferKind::Download, path)
    }

    /// 登记一个上传任务。
    pub fn start_upload(&self, path: impl Into<String>) -> TransferHandle {
        self.transfers.create(TransferKind::Upload, path)
    }

    /// 执行下载，返回完整内容。
    pub async fn download(&self, handle: &TransferHandle) -> Result<Vec<u8>, TransferError> {
        handle.start()?;
        match self.stream_into(handle).await {
            Ok(data) => {
                handle.complete()?;
                tracing::info!(
                    target: targets::HTTP,
                    transfer = %handle.id(),
                    bytes = data.len(),
                    "download completed"
                );
                Ok(data)
            }
            Err(TransferError::Http(err)) => {
                Self::record_failure(handle, &err);
                Err(TransferError::Http(err))
            }
            Err(other) => Err(other),
        }
    }

    /// 执行单次上传。
    pub async fn upload(
        &self,
        handle: &TransferHandle,
        body: Vec<u8>,
        content_type: &'static str,
    ) -> Result<HttpResponse, TransferError> {
        handle.start()?;
        handle.checkpoint().await?;
        let len = body.len() as u64;
        handle.set_total(Some(len));
        let config = RequestConfig::default();
        match self
            .send(Method::POST, handle.target(), Some((body, content_type)), &config)
            .await
        {
            Ok(response) => {
                handle.checkpoint().await?;
                handle.advance(len);
                handle.complete()?;
                Ok(response)
            }
            Err(err) => {
                Self::record_failure(handle, &err);
                Err(err.into())
            }
        }
    }

    async fn stream_into(&self, handle: &TransferHandle) -> Result<Vec<u8>, TransferError> {
        let request = self
            .prepare(Method::GET, handle.target(), None, &RequestConfig::default())
            .await?;
        let timeout = request.timeout;
        let mut stream = tokio::time::timeout(timeout, self.transport.open_stream(request))
            .await
            .map_err(|_| HttpError::Timeout(timeout))??;
        if !(200..300).contains(&stream.status) {
            return Err(HttpError::Status {
                status: stream.status,
                message: format!("download of {} rejected", handle.target()),
            }
            .into());
        }
        handle.set_total(stream.body.content_length());

        let mut data = Vec::new();
        loop {
            handle.checkpoint().await?;
            match stream.body.next_chunk().await? {
                Some(chunk) => {
                    let transferred = handle.advance(chunk.len() as u64);
                    data.extend_from_slice(&chunk);
                    tracing::trace!(target: targets::HTTP, transfer = %handle.id(), transferred, "chunk received");
                }
                None => break,
            }
        }
        handle.checkpoint().await?;
        Ok(data)
    }

    fn record_failure(handle: &TransferHandle, err: &HttpError) {
        tracing::warn!(target: targets::HTTP, transfer = %handle.id(), error = %err, "transfer failed");
        if let Err(transition) = handle.fail(err.to_string()) {
            tracing::debug!(target: targets::HTTP, error = %transition, "transfer already settled");
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<(Vec<u8>, &'static str)>,
        config: &RequestConfig,
    ) -> Result<HttpResponse, HttpError> {
        let request = self.prepare(method, path, body, config).await?;
        let timeout = request.timeout;
        let method = request.method.clone();
        let url = request.url.clone();
        let started = Instant::now();

        let outcome = match tokio::time::timeout(timeout, self.transport.execute(request)).await {
            Ok(result) => result.and_then(ensure_success),
            Err(_) => Err(HttpError::Timeout(timeout)),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(response) => tracing::debug!(
                target: targets::HTTP,
                %method,
                %url,
                status = response.status,
                elapsed_ms,
                "request completed"
            ),
            Err(err) => tracing::warn!(
                target: targets::HTTP,
                %method,
                %url,
                kind = ?err.kind(),
                error = %err,
                elapsed_ms,
                "request failed"
            ),
        }
        outcome
    }

    async fn prepare(
        &self,
        method: Method,
        path: &str,
        body: Option<(Vec<u8>, &'static str)>,
        config: &RequestConfig,
    ) -> Result<HttpRequest, HttpError> {
        if !config.skip_connection_check {
            if let Some(connection) = &self.connection {
                connection
                    .ensure_connected()
                    .await
                    .map_err(|err| HttpError::Unavailable(err.to_string()))?;
            }
        }

        let mut headers = vec![("Accept".to_owned(), "application/json".to_owned())];
        if !config.skip_auth {
            if let Some(token) = self.credentials.as_ref().and_then(|store| store.token()) {
                headers.push(("Authorization".to_owned(), format!("Bearer {token}")));
            }
        }
        let body = body.map(|(bytes, content_type)| {
            headers.push(("Content-Type".to_owned(), content_type.to_owned()));
            bytes
        });
        headers.extend(config.headers.iter().cloned());

        Ok(HttpRequest {
            method,
            url: resolve_url(&self.base_url, path),
            headers,
            body,
            timeout: config.timeout.unwrap_or(self.default_timeout),
        })
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.base_url)
            .field("default_timeout", &self.default_timeout)
            .field("authenticated", &self.credentials.is_some())
            .field("connection_aware", &self.connection.is_some())
            .finish()
    }
}

/// 绝对地址原样返回，其余路径拼接到基础地址之后。
pub(crate) fn resolve_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_owned();
    }
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

fn ensure_success(response: HttpResponse) -> Result<HttpResponse, HttpError> {
    if response.is_success() {
        return Ok(response);
    }
    let mut message = response.text();
    if message.len() > ERROR_BODY_LIMIT {
        let mut cut = ERROR_BODY_LIMIT;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
    }
    Err(HttpError::Status {
        status: response.status,
        message,
    })
}
