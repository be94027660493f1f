use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use warden_core::observability::targets;
use warden_core::{Clock, ConnectionConfig, EventBus, WardenEvent};

use crate::error::ConnectionError;
use crate::listener::{ConnectionListener, ListenerId, ListenerRegistry};
use crate::probe::{HealthProbe, run_probe};
use crate::state::{ConnectionPhase, ConnectionState};

/// 来自运行环境的连通性旁路信号。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectivitySignal {
    /// 操作系统报告网络恢复。
    Online,
    /// 操作系统报告网络断开。
    Offline,
    /// 宿主界面重新可见（例如窗口重新获得焦点）。
    VisibilityRestored,
}

/// 连接管理器：后端可达性的唯一事实来源。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 周期性探测后端健康，失败时断开并在短暂延迟后自动发起重连，避免检测到故障的瞬间
///   所有客户端同时重连形成惊群；
/// - 重连循环按指数退避逐次拉长等待，并受 `max_reconnect_attempts` 约束，耗尽后停在
///   `Disconnected`，等待手动或外部信号触发下一轮。
///
/// ## 逻辑 (How)
/// - 状态迁移全部经由 `Inner` 的私有方法完成，迁移后克隆快照并扇出给监听者；
/// - 周期检查与延迟重连是两个 `tokio` 任务，只持有 `Weak<Inner>`，`destroy` 或最后一个句柄
///   释放时被中止；
/// - “是否正在重连”的检查与置位在同一把锁内完成，并发调用 `reconnect` 只有一个会进入循环；
/// - 每轮重连在进入时记下代号，`disconnect` 与 `destroy` 推进代号；循环在每次探测和等待之后
///   比对代号，过期即静默退出，不再改动状态，新一轮重连因此不会与旧循环交错。
///
/// ## 契约 (What)
/// - `reconnect`：已销毁或正在重连时立即返回 `false`；已连接时返回 `true`；
/// - `disconnect`：停止周期检查、作废进行中的重连循环并通知监听者；已销毁时为空操作；
/// - `destroy`：幂等，中止全部任务并清空监听者，之后所有迁移操作均为空操作；
/// - 所有后台任务都通过 `tokio::spawn` 启动，调用方必须处于 Tokio 运行时中。
///
/// ## 注意事项 (Trade-offs)
/// - 监听者若需要回调管理器，应捕获 [`WeakConnectionManager`] 而非强句柄，否则会形成引用环，
///   管理器永远不会被释放。
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

/// 不延长生命周期的管理器句柄。
#[derive(Clone)]
pub struct WeakConnectionManager {
    inner: Weak<Inner>,
}

impl WeakConnectionManager {
    /// 若管理器仍存活，返回强句柄。
    pub fn upgrade(&self) -> Option<ConnectionManager> {
        self.inner.upgrade().map(|inner| ConnectionManager { inner })
    }
}

struct Inner {
    config: ConnectionConfig,
    probe: Arc<dyn HealthProbe>,
    clock: Arc<dyn Clock>,
    state: Mutex<ConnectionState>,
    listeners: ListenerRegistry,
    destroyed: AtomicBool,
    /// 重连代号。
    generation: AtomicU64,
    health_task: Mutex<Option<JoinHandle<()>>>,
    pending_reconnect: Mutex<Option<JoinHandle<()>>>,
    events: Option<EventBus>,
}

impl ConnectionManager {
    /// 创建处于 `Disconnected` 的管理器；调用 [`start`](Self::start) 后才开始探测。
    pub fn new(config: ConnectionConfig, probe: Arc<dyn HealthProbe>, clock: Arc<dyn Clock>) -> Self {
        Self::build(config, probe, clock, None)
    }

    /// 与 [`new`](Self::new) 相同，并在每次迁移后向事件总线广播 [`WardenEvent::ConnectionChanged`]。
    pub fn with_events(
        config: ConnectionConfig,
        probe: Arc<dyn HealthProbe>,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Self {
        Self::build(config, probe, clock, Some(events))
    }

    fn build(
        config: ConnectionConfig,
        probe: Arc<dyn HealthProbe>,
        clock: Arc<dyn Clock>,
        events: Option<EventBus>,
    ) -> Self {
        let state = ConnectionState::initial(config.max_reconnect_attempts);
        Self {
            inner: Arc::new(Inner {
                config,
                probe,
                clock,
                state: Mutex::new(state),
                listeners: ListenerRegistry::default(),
                destroyed: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                health_task: Mutex::new(None),
                pending_reconnect: Mutex::new(None),
                events,
            }),
        }
    }

    /// 返回弱句柄。
    pub fn downgrade(&self) -> WeakConnectionManager {
        WeakConnectionManager {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// 执行首次探测。成功进入 `Connected` 并启动周期检查；失败进入 `Disconnected`，
    /// 若开启自动重连则在延迟后发起重连。
    pub async fn start(&self) -> bool {
        if self.is_destroyed() {
            return false;
        }
        if self.check_health().await {
            self.mark_connected();
            true
        } else {
            if self.inner.config.auto_reconnect {
                self.schedule_reconnect(self.inner.config.reconnect_after_failure());
            }
            self.disconnect("initial health check failed");
            false
        }
    }

    /// 当前状态快照。
    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().clone()
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.inner.state.lock().phase()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().is_connected
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    /// 登记监听者。已销毁的管理器不再接受订阅，但仍返回一个不会被通知的标识。
    pub fn subscribe(&self, listener: ConnectionListener) -> ListenerId {
        let id = self.inner.listeners.subscribe(listener);
        if self.is_destroyed() {
            self.inner.listeners.clear();
        }
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.inner.listeners.unsubscribe(id)
    }

    /// 单次健康探测，结果永远是布尔值。
    pub async fn check_health(&self) -> bool {
        run_probe(self.inner.probe.as_ref(), self.inner.config.probe_timeout()).await
    }

    /// 主动断开。
    pub fn disconnect(&self, reason: &str) {
        if self.is_destroyed() {
            return;
        }
        self.stop_health_timer();
        let snapshot = {
            let mut state = self.inner.state.lock();
            self.inner.generation.fetch_add(1, Ordering::AcqRel);
            state.enter_disconnected(reason);
            state.clone()
        };
        tracing::info!(target: targets::CONNECTION, reason, "connection marked disconnected");
        self.publish(&snapshot);
    }

    /// 有界指数退避重连。返回本轮是否恢复连接。
    pub async fn reconnect(&self) -> bool {
        if self.is_destroyed() {
            return false;
        }
        let (generation, snapshot) = {
            let mut state = self.inner.state.lock();
            if state.is_reconnecting {
                return false;
            }
            if state.is_connected {
                return true;
            }
            state.enter_reconnecting();
            (self.inner.generation.load(Ordering::Acquire), state.clone())
        };
        self.publish(&snapshot);

        let max = self.inner.config.max_reconnect_attempts;
        let backoff = self.inner.config.backoff();
        loop {
            let attempt = {
                let mut state = self.inner.state.lock();
                if self.is_stale(generation) {
                    return self.abandon(generation);
                }
                if state.reconnect_attempts >= max {
                    break;
                }
                state.reconnect_attempts += 1;
                state.reconnect_attempts
            };

            if self.check_health().await {
                let snapshot = {
                    let mut state = self.inner.state.lock();
                    if self.is_stale(generation) {
                        return self.abandon(generation);
                    }
                    state.enter_connected(self.inner.clock.now());
                    state.clone()
                };
                tracing::info!(target: targets::CONNECTION, attempt, "reconnected to backend");
                self.start_health_timer();
                self.publish(&snapshot);
                return true;
            }
            if attempt >= max {
                break;
            }

            let delay = backoff.delay_for(attempt);
            tracing::debug!(
                target: targets::CONNECTION,
                attempt,
                max,
                delay_ms = delay.as_millis() as u64,
                "reconnect attempt failed; backing off"
            );
            self.inner.clock.sleep(delay).await;
        }

        let snapshot = {
            let mut state = self.inner.state.lock();
            if self.is_stale(generation) {
                return self.abandon(generation);
            }
            state.enter_disconnected("reconnect attempts exhausted");
            state.clone()
        };
        tracing::warn!(target: targets::CONNECTION, max, "reconnect attempts exhausted");
        self.publish(&snapshot);
        false
    }

    /// 处理运行环境的旁路信号。
    pub async fn handle_signal(&self, signal: ConnectivitySignal) {
        if self.is_destroyed() {
            return;
        }
        tracing::debug!(target: targets::CONNECTION, ?signal, "connectivity signal");
        match signal {
            ConnectivitySignal::Offline => self.disconnect("network offline"),
            ConnectivitySignal::Online => {
                if !self.is_connected() && self.inner.config.auto_reconnect {
                    self.reconnect().await;
                }
            }
            ConnectivitySignal::VisibilityRestored => {
                if !self.is_connected() {
                    self.reconnect().await;
                }
            }
        }
    }

    /// 请求前置检查：断线时先尝试一轮重连。
    pub async fn ensure_connected(&self) -> Result<(), ConnectionError> {
        if self.is_destroyed() {
            return Err(ConnectionError::Destroyed);
        }
        let state = self.state();
        if state.is_connected {
            return Ok(());
        }
        if state.is_reconnecting {
            return Err(ConnectionError::Unavailable {
                reason: "reconnect in progress".into(),
            });
        }
        if self.reconnect().await {
            return Ok(());
        }
        if self.is_destroyed() {
            return Err(ConnectionError::Destroyed);
        }
        let reason = self
            .state()
            .disconnect_reason
            .unwrap_or_else(|| "backend unreachable".into());
        Err(ConnectionError::Unavailable { reason })
    }

    /// 销毁管理器，幂等。
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.abort_tasks();
        self.inner.listeners.clear();
        let mut state = self.inner.state.lock();
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        state.is_reconnecting = false;
        drop(state);
        tracing::info!(target: targets::CONNECTION, "connection manager destroyed");
    }

    fn mark_connected(&self) {
        let snapshot = {
            let mut state = self.inner.state.lock();
            state.enter_connected(self.inner.clock.now());
            state.clone()
        };
        self.start_health_timer();
        self.publish(&snapshot);
    }

    /// 已销毁或代号已被推进。
    fn is_stale(&self, generation: u64) -> bool {
        self.is_destroyed() || self.inner.generation.load(Ordering::Acquire) != generation
    }

    fn abandon(&self, generation: u64) -> bool {
        tracing::debug!(
            target: targets::CONNECTION,
            generation,
            "reconnect loop superseded; leaving state untouched"
        );
        false
    }

    fn publish(&self, snapshot: &ConnectionState) {
        self.inner.listeners.notify(snapshot);
        if let Some(events) = &self.inner.events {
            events.publish(WardenEvent::ConnectionChanged {
                connected: snapshot.is_connected,
                reconnecting: snapshot.is_reconnecting,
            });
        }
    }

    fn stop_health_timer(&self) {
        if let Some(handle) = self.inner.health_task.lock().take() {
            handle.abort();
        }
    }

    fn start_health_timer(&self) {
        let weak = Arc::downgrade(&self.inner);
        let clock = Arc::clone(&self.inner.clock);
        let interval = self.inner.config.health_check_interval();
        let handle = tokio::spawn(async move {
            loop {
                clock.sleep(interval).await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let manager = ConnectionManager { inner };
                if manager.is_destroyed() {
                    break;
                }
                let state = manager.state();
                if state.is_reconnecting || !state.is_connected {
                    continue;
                }
                if manager.check_health().await {
                    continue;
                }
                tracing::warn!(target: targets::CONNECTION, "periodic health check failed");
                manager.schedule_reconnect(manager.inner.config.reconnect_after_failure());
                manager.disconnect("health check failed");
                break;
            }
        });
        if let Some(previous) = self.inner.health_task.lock().replace(handle) {
            previous.abort();
        }
    }

    fn schedule_reconnect(&self, delay: Duration) {
        let weak = Arc::downgrade(&self.inner);
        let clock = Arc::clone(&self.inner.clock);
        let handle = tokio::spawn(async move {
            clock.sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                let manager = ConnectionManager { inner };
                manager.reconnect().await;
            }
        });
        if let Some(previous) = self.inner.pending_reconnect.lock().replace(handle) {
            previous.abort();
        }
    }
}

impl Inner {
    fn abort_tasks(&self) {
        if let Some(handle) = self.health_task.lock().take() {
            handle.abort();
        }
        if let Some(handle) = self.pending_reconnect.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("destroyed", &self.is_destroyed())
            .field("listeners", &self.inner.listeners.len())
            .finish()
    }
}
