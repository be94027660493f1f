use std::time::Instant;

/// 连接三态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionPhase {
    Connected,
    Disconnected,
    Reconnecting,
}

/// 连接状态快照。
///
/// # 契约说明（What）
/// - 只能由 [`ConnectionManager`](crate::ConnectionManager) 的内部迁移方法修改；
/// - 监听者收到的是克隆出的快照，修改它不会影响管理器；
/// - `reconnect_attempts` 在重连成功后归零；重试耗尽时保持为 `max_reconnect_attempts`，便于诊断。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionState {
    pub is_connected: bool,
    pub is_reconnecting: bool,
    pub reconnect_attempts: u32,
    pub max_reconnect_attempts: u32,
    pub disconnect_reason: Option<String>,
    pub last_connected_at: Option<Instant>,
}

impl ConnectionState {
    pub(crate) fn initial(max_reconnect_attempts: u32) -> Self {
        Self {
            is_connected: false,
            is_reconnecting: false,
            reconnect_attempts: 0,
            max_reconnect_attempts,
            disconnect_reason: None,
            last_connected_at: None,
        }
    }

    /// 由布尔字段推导出的三态。重连中优先于其余两态。
    pub fn phase(&self) -> ConnectionPhase {
        if self.is_reconnecting {
            ConnectionPhase::Reconnecting
        } else if self.is_connected {
            ConnectionPhase::Connected
        } else {
            ConnectionPhase::Disconnected
        }
    }

    pub(crate) fn enter_connected(&mut self, now: Instant) {
        self.is_connected = true;
        self.is_reconnecting = false;
        self.reconnect_attempts = 0;
        self.disconnect_reason = None;
        self.last_connected_at = Some(now);
    }

    pub(crate) fn enter_disconnected(&mut self, reason: impl Into<String>) {
        self.is_connected = false;
        self.is_reconnecting = false;
        self.disconnect_reason = Some(reason.into());
    }

    pub(crate) fn enter_reconnecting(&mut self) {
        self.is_connected = false;
        self.is_reconnecting = true;
        self.reconnect_attempts = 0;
    }
}
