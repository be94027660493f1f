use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::Instrument;
use warden_core::observability::targets;
use warden_core::{
    BackoffPolicy, Clock, CoreError, CredentialStore, ErrorCategory, RouteDescriptor, RouteSource,
    RoutesConfig, codes,
};

use crate::permission::PermissionStore;
use crate::registry::{RouteOrigin, RouterEngine};
use crate::transform::transform;

/// 动态路由初始化失败。
///
/// - `Fatal`：认证上下文缺失或被后端拒绝，不消耗重试，调用方应清理凭据并跳转登录；
/// - `Exhausted`：重试耗尽，加载标记已被强制置为 `true`（降级为仅静态路由）；
/// - `Superseded`：执行期间会话已被复位（登出），结果被整体丢弃，未写入任何状态；
/// - `Internal`：执行任务本身异常终止（panic 或被中止）。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InitDynamicRouteError {
    #[error("dynamic route initialization aborted: {message}")]
    Fatal { code: &'static str, message: String },
    #[error("dynamic route initialization gave up after {attempts} attempts: {message}")]
    Exhausted {
        attempts: u32,
        code: &'static str,
        message: String,
    },
    #[error("dynamic route initialization discarded: session ended before it completed")]
    Superseded,
    #[error("dynamic route initialization task failed: {0}")]
    Internal(String),
}

impl From<InitDynamicRouteError> for CoreError {
    fn from(value: InitDynamicRouteError) -> Self {
        match &value {
            InitDynamicRouteError::Fatal { code, .. } => CoreError::new(*code, value.to_string())
                .with_category(ErrorCategory::Unauthenticated),
            InitDynamicRouteError::Superseded => {
                CoreError::new(codes::ROUTE_INIT_FAILED, value.to_string())
                    .with_category(ErrorCategory::Cancelled)
            }
            InitDynamicRouteError::Exhausted { .. } | InitDynamicRouteError::Internal(_) => {
                CoreError::new(codes::ROUTE_INIT_FAILED, value.to_string())
                    .with_category(ErrorCategory::NonRetryable)
            }
        }
    }
}

/// 一次成功初始化的诊断信息。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InitReport {
    /// 加载标记早已为真，本次没有发起任何请求。
    pub already_loaded: bool,
    pub fetched: usize,
    pub registered: usize,
    pub skipped: usize,
    pub dropped: usize,
    /// 含首次在内的拉取次数。
    pub attempts: u32,
}

type InitResult = Result<InitReport, InitDynamicRouteError>;
type SharedInit = Shared<BoxFuture<'static, InitResult>>;

/// 动态路由初始化器。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 登录后的第一次导航需要把后端授权的路由装进路由引擎；这一过程必须幂等、可重试，
///   且在快速连续导航时只向后端发起一次请求；
/// - 递归重试改写为显式的有界循环，等待通过注入的 [`Clock`] 完成，测试无需真实等待。
///
/// ## 逻辑 (How)
/// 1. 加载标记为真时立即返回；
/// 2. 否则在互斥锁内检查是否已有进行中的执行：有则克隆其 [`Shared`] 句柄一起等待，
///    没有则 `tokio::spawn` 一个执行任务并登记；执行任务结束时自行清除登记；
/// 3. 执行任务写入静态路由后进入循环：校验凭据 → 拉取 → 变换 → 写入动态路由 → 批量注册 → 置位；
/// 4. 认证类错误立即以 `Fatal` 返回；其余错误复位加载标记，按 `(k + 1) * step` 等待后重试，
///    超过 `max_retries` 后强制置位并返回 `Exhausted`；
/// 5. 执行任务启动时记下 [`PermissionStore::epoch`]，所有状态写入都经由
///    [`PermissionStore::within_epoch`]；期间发生登出则丢弃结果并返回 `Superseded`。
///
/// ## 契约 (What)
/// - 同一会话纪元内至多一个拉取在进行中，并发调用方共享同一结果；
/// - 纪元已过期的执行不会被新会话加入，也不会清除新会话的登记；
/// - 调用方放弃等待不会中止拉取，结果仍会落到权限状态中；
/// - 必须在 Tokio 运行时中调用。
#[derive(Clone)]
pub struct DynamicRouteInitializer {
    inner: Arc<Inner>,
}

struct Inner {
    source: Arc<dyn RouteSource>,
    credentials: Arc<dyn CredentialStore>,
    permissions: Arc<PermissionStore>,
    engine: Arc<dyn RouterEngine>,
    clock: Arc<dyn Clock>,
    max_retries: u32,
    backoff: BackoffPolicy,
    in_flight: Mutex<Option<(u64, SharedInit)>>,
}

impl DynamicRouteInitializer {
    pub fn new(
        source: Arc<dyn RouteSource>,
        credentials: Arc<dyn CredentialStore>,
        permissions: Arc<PermissionStore>,
        engine: Arc<dyn RouterEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let defaults = RoutesConfig::default();
        Self {
            inner: Arc::new(Inner {
                source,
                credentials,
                permissions,
                engine,
                clock,
                max_retries: defaults.max_retries,
                backoff: defaults.retry_backoff(),
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// 以配置覆盖重试次数与节律。须在首次调用前设置。
    pub fn with_config(mut self, config: &RoutesConfig) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.max_retries = config.max_retries;
            inner.backoff = config.retry_backoff();
        }
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.inner.max_retries
    }

    /// 是否有执行中的初始化。
    pub fn is_in_flight(&self) -> bool {
        self.inner.in_flight.lock().is_some()
    }

    pub fn permissions(&self) -> &Arc<PermissionStore> {
        &self.inner.permissions
    }

    /// 装载动态路由。`debug` 为真时逐条输出注册的路由。
    pub async fn init_dynamic_routes(
        &self,
        static_routes: Vec<RouteDescriptor>,
        debug: bool,
    ) -> InitResult {
        if self.inner.permissions.is_loaded() {
            return Ok(InitReport {
                already_loaded: true,
                ..InitReport::default()
            });
        }

        let shared = {
            let epoch = self.inner.permissions.epoch();
            let mut slot = self.inner.in_flight.lock();
            match slot.as_ref() {
                Some((started, existing)) if *started == epoch => {
                    tracing::debug!(target: targets::INITIALIZER, "joining in-flight initialization");
                    existing.clone()
                }
                _ => {
                    let inner = Arc::clone(&self.inner);
                    let task = tokio::spawn(
                        async move {
                            let result = inner.run(epoch, static_routes, debug).await;
                            let mut slot = inner.in_flight.lock();
                            if slot.as_ref().is_some_and(|(started, _)| *started == epoch) {
                                slot.take();
                            }
                            result
                        }
                        .in_current_span(),
                    );
                    let shared = async move {
                        task.await.unwrap_or_else(|join| {
                            Err(InitDynamicRouteError::Internal(join.to_string()))
                        })
                    }
                    .boxed()
                    .shared();
                    *slot = Some((epoch, shared.clone()));
                    shared
                }
            }
        };
        shared.await
    }
}

impl Inner {
    async fn run(
        &self,
        epoch: u64,
        static_routes: Vec<RouteDescriptor>,
        debug: bool,
    ) -> InitResult {
        self.permissions
            .within_epoch(epoch, || self.permissions.set_static_routes(static_routes))
            .ok_or_else(|| self.superseded(epoch))?;

        let mut retry: u32 = 0;
        loop {
            let err = match self.attempt(epoch, debug).await {
                Ok(mut report) => {
                    report.attempts = retry + 1;
                    tracing::info!(
                        target: targets::INITIALIZER,
                        fetched = report.fetched,
                        registered = report.registered,
                        skipped = report.skipped,
                        attempts = report.attempts,
                        "dynamic routes loaded"
                    );
                    return Ok(report);
                }
                Err(AttemptError::Superseded) => return Err(self.superseded(epoch)),
                Err(AttemptError::Failed(err)) => err,
            };

            if matches!(err.category(), ErrorCategory::Unauthenticated) {
                tracing::warn!(target: targets::INITIALIZER, error = %err, "credentials unusable; aborting");
                return Err(InitDynamicRouteError::Fatal {
                    code: err.code(),
                    message: err.message().to_owned(),
                });
            }

            let exhausted = retry >= self.max_retries;
            self.permissions
                .within_epoch(epoch, || self.permissions.set_loaded(exhausted))
                .ok_or_else(|| self.superseded(epoch))?;
            if exhausted {
                tracing::error!(
                    target: targets::INITIALIZER,
                    error = %err,
                    attempts = retry + 1,
                    "dynamic route retries exhausted; continuing with static routes"
                );
                return Err(InitDynamicRouteError::Exhausted {
                    attempts: retry + 1,
                    code: err.code(),
                    message: err.message().to_owned(),
                });
            }

            let delay: Duration = self.backoff.delay_for(retry + 1);
            tracing::warn!(
                target: targets::INITIALIZER,
                error = %err,
                retry = retry + 1,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                "dynamic route fetch failed; retrying"
            );
            self.clock.sleep(delay).await;
            retry += 1;
        }
    }

    fn superseded(&self, epoch: u64) -> InitDynamicRouteError {
        tracing::info!(
            target: targets::INITIALIZER,
            started = epoch,
            current = self.permissions.epoch(),
            "session ended during initialization; discarding result"
        );
        InitDynamicRouteError::Superseded
    }

    async fn attempt(&self, epoch: u64, debug: bool) -> Result<InitReport, AttemptError> {
        if self.permissions.epoch() != epoch {
            return Err(AttemptError::Superseded);
        }
        if self.credentials.token().is_none() || self.credentials.user_id().is_none() {
            return Err(CoreError::new(
                codes::AUTH_MISSING_CREDENTIALS,
                "user information missing",
            )
            .into());
        }

        let descriptors = self.source.fetch_routes().await?;
        if descriptors.is_empty() {
            tracing::warn!(target: targets::INITIALIZER, "backend returned no dynamic routes");
        }

        let outcome = transform(&descriptors);
        let fetched = descriptors.len();
        let report = self
            .permissions
            .within_epoch(epoch, || {
                self.permissions.set_dynamic_routes(descriptors);
                let report = self
                    .engine
                    .register_batch(&outcome.routes, RouteOrigin::Dynamic);
                self.permissions.set_loaded(true);
                report
            })
            .ok_or(AttemptError::Superseded)?;

        if debug {
            for route in outcome.routes.iter().flat_map(|route| route.walk()) {
                tracing::info!(
                    target: targets::INITIALIZER,
                    name = %route.name,
                    path = %route.full_path,
                    roles = ?route.required_roles(),
                    "registered dynamic route"
                );
            }
        }

        Ok(InitReport {
            already_loaded: false,
            fetched,
            registered: report.registered,
            skipped: report.skipped.len(),
            dropped: outcome.dropped.len(),
            attempts: 0,
        })
    }
}

enum AttemptError {
    Failed(CoreError),
    /// 拉取期间会话纪元已推进。
    Superseded,
}

impl From<CoreError> for AttemptError {
    fn from(value: CoreError) -> Self {
        Self::Failed(value)
    }
}

impl std::fmt::Debug for DynamicRouteInitializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicRouteInitializer")
            .field("max_retries", &self.inner.max_retries)
            .field("backoff", &self.inner.backoff)
            .field("in_flight", &self.is_in_flight())
            .finish()
    }
}
