use std::borrow::Cow;
use std::error::Error;
use std::fmt;
use std::time::Duration;

/// `CoreError` 是 warden 各层共享的稳定错误域，是所有可观察错误的最终形态。
///
/// # 设计背景（Why）
/// - 连接层、HTTP 层与路由层产生的故障需要合流为统一的错误码，导航守卫才能在边界处
///   一次性完成“重定向到登录 / 403 / 500”的判定，而无需理解每个实现 crate 的内部枚举。
/// - 错误码 `code` 始终为 `'static` 字符串，承载稳定语义；`message` 面向排障人员。
///
/// # 契约说明（What）
/// - **前置条件**：调用方应使用 [`codes`] 模块中的码值，或遵循 `<域>.<语义>` 约定自定义码值；
/// - **后置条件**：除非显式调用 `with_*` 方法，错误不会携带分类与底层原因；
///   未设置分类时 [`category`](Self::category) 回退到按码值推断的默认分类。
///
/// # 设计取舍（Trade-offs）
/// - 采用 `Cow<'static, str>` 保存消息，静态文案零分配，动态文案付出一次堆分配。
#[derive(Debug)]
pub struct CoreError {
    code: &'static str,
    message: Cow<'static, str>,
    category: Option<ErrorCategory>,
    cause: Option<ErrorCause>,
}

/// `ErrorCause` 封装底层原因，保持 `Send + Sync` 以便跨任务传递。
pub type ErrorCause = Box<dyn Error + Send + Sync + 'static>;

/// 框架统一的返回值别名，默认错误类型为 [`CoreError`]。
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

impl CoreError {
    /// 构造核心错误。
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            category: None,
            cause: None,
        }
    }

    /// 附带底层原因并返回新的核心错误。
    pub fn with_cause(mut self, cause: impl Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// 为错误标记结构化分类信息，驱动重试与重定向策略。
    ///
    /// # 契约说明（What）
    /// - 应与错误码语义保持一致，避免将鉴权失败标记为 `Retryable`；
    /// - 显式分类优先于按码值推断的默认分类。
    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// 获取结构化错误分类。
    ///
    /// # 执行逻辑（How）
    /// 1. 优先返回显式设置的分类；
    /// 2. 否则按错误码查表（[`codes::default_category`]）；
    /// 3. 查表失败回退为 `NonRetryable`，表示默认不触发自动策略。
    pub fn category(&self) -> ErrorCategory {
        self.category
            .clone()
            .or_else(|| codes::default_category(self.code))
            .unwrap_or(ErrorCategory::NonRetryable)
    }

    /// 获取稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 获取描述。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 获取底层原因。
    pub fn cause(&self) -> Option<&ErrorCause> {
        self.cause.as_ref()
    }

    /// 判断错误是否建议重试。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Retryable(_) | ErrorCategory::Timeout
        )
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl Error for CoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause
            .as_ref()
            .map(|boxed| boxed.as_ref() as &(dyn Error + 'static))
    }
}

/// 错误分类枚举，驱动自动化容错策略。
///
/// # 契约说明（What）
/// - `Retryable`：瞬时故障（网络抖动、服务端 5xx），携带退避建议 [`RetryAdvice`]；
/// - `Timeout`：请求或探测超时，同样视为可重试；
/// - `Security`：鉴权/授权失败或 TLS 校验失败，不可重试；
/// - `Unauthenticated`：缺少或失效的认证上下文，调用方必须清理凭据并强制重新登录；
/// - `Structural`：数据形态不合法（路由名冲突、路径缺失），按条目丢弃；
/// - `Cancelled`：操作被显式取消；
/// - `NonRetryable`：其余确定性失败。
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    Retryable(RetryAdvice),
    NonRetryable,
    Timeout,
    Security,
    Unauthenticated,
    Structural,
    Cancelled,
}

/// 重试建议：推荐的等待时长与可选原因。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryAdvice {
    /// 推荐的等待时长。
    pub wait: Duration,
    /// 可选的原因描述，帮助调用方生成观测日志。
    pub reason: Option<Cow<'static, str>>,
}

impl RetryAdvice {
    /// 构造一个仅包含等待时间的建议。
    pub const fn after(wait: Duration) -> Self {
        Self { wait, reason: None }
    }

    /// 为建议附加原因描述。
    pub fn with_reason(mut self, reason: impl Into<Cow<'static, str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// 稳定错误码表。
///
/// 码值一经发布即不可修改含义；新增码值需同步补充 [`default_category`] 的映射。
pub mod codes {
    use std::time::Duration;

    use super::{ErrorCategory, RetryAdvice};

    pub const AUTH_MISSING_CREDENTIALS: &str = "auth.missing_credentials";
    pub const AUTH_REJECTED: &str = "auth.rejected";
    pub const CONNECTION_UNAVAILABLE: &str = "connection.unavailable";
    pub const CONNECTION_DESTROYED: &str = "connection.destroyed";
    pub const HTTP_NETWORK: &str = "http.network";
    pub const HTTP_TIMEOUT: &str = "http.timeout";
    pub const HTTP_CORS: &str = "http.cors";
    pub const HTTP_SECURITY: &str = "http.security";
    pub const HTTP_SERVER: &str = "http.server";
    pub const HTTP_DECODE: &str = "http.decode";
    pub const HTTP_UNKNOWN: &str = "http.unknown";
    pub const ROUTE_NAME_CONFLICT: &str = "route.name_conflict";
    pub const ROUTE_INVALID_PATH: &str = "route.invalid_path";
    pub const ROUTE_INIT_FAILED: &str = "route.init_failed";
    pub const STORAGE_IO: &str = "storage.io";
    pub const STORAGE_CODEC: &str = "storage.codec";
    pub const CONFIG_INVALID: &str = "config.invalid";
    pub const TRANSFER_INVALID_TRANSITION: &str = "transfer.invalid_transition";
    pub const TRANSFER_CANCELLED: &str = "transfer.cancelled";

    /// 按错误码推断默认分类。
    pub fn default_category(code: &str) -> Option<ErrorCategory> {
        let category = match code {
            AUTH_MISSING_CREDENTIALS | AUTH_REJECTED => ErrorCategory::Unauthenticated,
            HTTP_NETWORK | CONNECTION_UNAVAILABLE => {
                ErrorCategory::Retryable(RetryAdvice::after(Duration::from_millis(500)))
            }
            HTTP_SERVER => ErrorCategory::Retryable(RetryAdvice::after(Duration::from_secs(1))),
            HTTP_TIMEOUT => ErrorCategory::Timeout,
            HTTP_CORS | HTTP_SECURITY => ErrorCategory::Security,
            ROUTE_NAME_CONFLICT | ROUTE_INVALID_PATH => ErrorCategory::Structural,
            CONNECTION_DESTROYED | TRANSFER_CANCELLED => ErrorCategory::Cancelled,
            _ => return None,
        };
        Some(category)
    }
}
