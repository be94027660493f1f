use std::time::Duration;

use thiserror::Error;
use warden_core::{CoreError, ErrorCategory, codes};

/// HTTP 层错误分类。
///
/// 守卫与初始化器只依据分类做决策，不关心具体是哪一种传输故障。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HttpErrorKind {
    Network,
    Timeout,
    /// 仅由能够识别跨域拒绝的传输产生，[`ReqwestTransport`](crate::ReqwestTransport) 不会产出。
    Cors,
    Security,
    Server,
    Unknown,
}

/// HTTP 请求失败的全部形态。
///
/// # 契约说明（What）
/// - `Status` 保留原始状态码与截断后的响应体，`kind()` 按状态码归类：401/403 为 `Security`，
///   408 为 `Timeout`，5xx 为 `Server`，其余为 `Unknown`；
/// - `is_retryable()` 仅对网络、超时与服务端错误为真；
/// - 转换为 [`CoreError`] 时 401 映射到 `auth.rejected`，调用方据此清理凭据。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HttpError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// 跨域策略拒绝。
    ///
    /// 保留给运行在浏览器等宿主中、能区分跨域拒绝与普通网络故障的传输实现；
    /// 原生 reqwest 传输看不到跨域策略，此类故障一律归入 `Network`。
    #[error("cross-origin request rejected: {0}")]
    Cors(String),
    #[error("transport security failure: {0}")]
    Security(String),
    #[error("unexpected status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("failed to decode response body: {0}")]
    Decode(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl HttpError {
    pub fn kind(&self) -> HttpErrorKind {
        match self {
            Self::Network(_) | Self::Unavailable(_) => HttpErrorKind::Network,
            Self::Timeout(_) => HttpErrorKind::Timeout,
            Self::Cors(_) => HttpErrorKind::Cors,
            Self::Security(_) => HttpErrorKind::Security,
            Self::Status { status, .. } => match *status {
                401 | 403 => HttpErrorKind::Security,
                408 => HttpErrorKind::Timeout,
                500..=599 => HttpErrorKind::Server,
                _ => HttpErrorKind::Unknown,
            },
            Self::Decode(_) | Self::InvalidRequest(_) => HttpErrorKind::Unknown,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            HttpErrorKind::Network | HttpErrorKind::Timeout | HttpErrorKind::Server
        )
    }

    /// 后端拒绝了当前凭据。
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Status { status: 401, .. })
    }

    /// 响应状态码（仅 `Status` 变体携带）。
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// 将 reqwest 的传输错误归入本层分类。
    pub(crate) fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            return Self::Timeout(timeout);
        }
        if err.is_decode() {
            return Self::Decode(err.to_string());
        }
        if err.is_builder() {
            return Self::InvalidRequest(err.to_string());
        }
        let message = error_chain(&err);
        let lowered = message.to_ascii_lowercase();
        if lowered.contains("certificate") || lowered.contains("tls") {
            Self::Security(message)
        } else {
            Self::Network(message)
        }
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

impl From<HttpError> for CoreError {
    fn from(value: HttpError) -> Self {
        let code = match (&value, value.kind()) {
            (HttpError::Status { status: 401, .. }, _) => codes::AUTH_REJECTED,
            (HttpError::Decode(_), _) => codes::HTTP_DECODE,
            (_, HttpErrorKind::Network) => codes::HTTP_NETWORK,
            (_, HttpErrorKind::Timeout) => codes::HTTP_TIMEOUT,
            (_, HttpErrorKind::Cors) => codes::HTTP_CORS,
            (_, HttpErrorKind::Security) => codes::HTTP_SECURITY,
            (_, HttpErrorKind::Server) => codes::HTTP_SERVER,
            (_, HttpErrorKind::Unknown) => codes::HTTP_UNKNOWN,
        };
        let error = CoreError::new(code, value.to_string());
        match value.kind() {
            HttpErrorKind::Unknown => error.with_category(ErrorCategory::NonRetryable),
            _ => error,
        }
    }
}
