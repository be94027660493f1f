//! 静态配置：连接、HTTP、路由与持久化四个分区。
//!
//! # 模块定位（Why）
//! - 公共路由白名单、健康检查路径、退避参数等均属于“构建期/部署期确定”的静态配置，
//!   不应在运行时计算；集中为一个 TOML 文档便于审计。
//! - 每个分区都带完整默认值，部署方只需覆盖差异项。
//!
//! # 契约说明（What）
//! - 时间类字段统一以毫秒整数表达（`*_ms`），并提供返回 [`Duration`] 的访问器；
//! - [`WardenConfig::validate`] 在加载后执行语义校验，违反约束时返回 [`ConfigError::Invalid`]。

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{CoreError, ErrorCategory, codes};
use crate::retry::BackoffPolicy;

/// 配置加载与校验错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<ConfigError> for CoreError {
    fn from(value: ConfigError) -> Self {
        let message = value.to_string();
        CoreError::new(codes::CONFIG_INVALID, message)
            .with_category(ErrorCategory::NonRetryable)
            .with_cause(value)
    }
}

/// 顶层配置文档。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub connection: ConnectionConfig,
    pub http: HttpConfig,
    pub routes: RoutesConfig,
    pub storage: StorageConfig,
}

impl WardenConfig {
    /// 从 TOML 文本解析并校验。
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载并校验。
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// 语义校验。
    pub fn validate(&self) -> Result<(), ConfigError> {
        let connection = &self.connection;
        if connection.max_reconnect_attempts == 0 {
            return Err(ConfigError::Invalid(
                "connection.max_reconnect_attempts must be at least 1".into(),
            ));
        }
        if connection.base_reconnect_delay_ms > connection.max_reconnect_delay_ms {
            return Err(ConfigError::Invalid(
                "connection.base_reconnect_delay_ms exceeds max_reconnect_delay_ms".into(),
            ));
        }
        if connection.health_check_interval_ms == 0 || connection.probe_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "connection intervals and timeouts must be non-zero".into(),
            ));
        }
        for (field, value) in [
            ("connection.health_path", connection.health_path.as_str()),
            ("routes.fetch_path", self.routes.fetch_path.as_str()),
            ("routes.login_path", self.routes.login_path.as_str()),
            ("routes.forbidden_path", self.routes.forbidden_path.as_str()),
            ("routes.not_found_path", self.routes.not_found_path.as_str()),
            ("routes.server_error_path", self.routes.server_error_path.as_str()),
        ] {
            if !value.starts_with('/') {
                return Err(ConfigError::Invalid(format!("{field} must start with `/`")));
            }
        }
        if self.storage.prefix.trim().is_empty() {
            return Err(ConfigError::Invalid("storage.prefix must not be empty".into()));
        }
        Ok(())
    }
}

/// 连接管理器配置。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// 健康检查路径。
    pub health_path: String,
    /// 已连接状态下的周期性健康检查间隔。
    pub health_check_interval_ms: u64,
    /// 单次健康探测的超时。
    pub probe_timeout_ms: u64,
    pub max_reconnect_attempts: u32,
    pub base_reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    /// 收到“网络恢复”信号时是否自动重连。
    pub auto_reconnect: bool,
    /// 周期检查失败后，延迟多久再发起自动重连。
    pub reconnect_after_failure_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            health_path: "/api/health".into(),
            health_check_interval_ms: 30_000,
            probe_timeout_ms: 5_000,
            max_reconnect_attempts: 5,
            base_reconnect_delay_ms: 1_000,
            max_reconnect_delay_ms: 30_000,
            auto_reconnect: true,
            reconnect_after_failure_ms: 2_000,
        }
    }
}

impl ConnectionConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn reconnect_after_failure(&self) -> Duration {
        Duration::from_millis(self.reconnect_after_failure_ms)
    }

    /// 重连循环使用的指数退避策略。
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::exponential(
            Duration::from_millis(self.base_reconnect_delay_ms),
            Duration::from_millis(self.max_reconnect_delay_ms),
        )
    }
}

/// HTTP 客户端配置。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".into(),
            timeout_ms: 10_000,
            user_agent: concat!("warden/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// 路由与导航配置。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutesConfig {
    /// 授权路由接口路径。
    pub fetch_path: String,
    /// 动态路由初始化的最大重试次数。
    pub max_retries: u32,
    /// 第 k 次重试前等待 `k * retry_step_ms`。
    pub retry_step_ms: u64,
    pub login_path: String,
    /// 登录页携带原始目标路径所用的查询参数名。
    pub redirect_query_key: String,
    /// 无需认证即可访问的路径。
    pub public_paths: Vec<String>,
    pub forbidden_path: String,
    pub not_found_path: String,
    pub server_error_path: String,
    /// 越权访问审计记录的保留条数。
    pub audit_capacity: usize,
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            fetch_path: "/auth/routes".into(),
            max_retries: 3,
            retry_step_ms: 1_000,
            login_path: "/login".into(),
            redirect_query_key: "redirect".into(),
            public_paths: vec!["/login".into()],
            forbidden_path: "/403".into(),
            not_found_path: "/404".into(),
            server_error_path: "/500".into(),
            audit_capacity: 64,
        }
    }
}

impl RoutesConfig {
    /// 初始化器的线性重试节律。
    pub fn retry_backoff(&self) -> BackoffPolicy {
        let step = Duration::from_millis(self.retry_step_ms);
        BackoffPolicy::linear(step, step.saturating_mul(self.max_retries.max(1)))
    }

    /// 错误页路径集合。
    pub fn error_pages(&self) -> [&str; 3] {
        [
            self.forbidden_path.as_str(),
            self.not_found_path.as_str(),
            self.server_error_path.as_str(),
        ]
    }

    /// 是否为错误页。
    pub fn is_error_page(&self, path: &str) -> bool {
        self.error_pages().contains(&path)
    }

    /// 是否在公共白名单内。
    pub fn is_public(&self, path: &str) -> bool {
        path == self.login_path || self.public_paths.iter().any(|public| public == path)
    }
}

/// 持久化配置。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// 进程级键前缀。
    pub prefix: String,
    /// 为 `None` 时使用内存存储。
    pub directory: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            prefix: "warden".into(),
            directory: None,
        }
    }
}
