use tokio::sync::broadcast;

use crate::observability::targets;

/// 进程内广播的状态变更事件。
///
/// 外部订阅者（标题重算、菜单刷新等）据此自行拉取最新状态；事件本身只携带摘要。
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum WardenEvent {
    /// 路由表发生实质变化。
    RoutesChanged { dynamic_routes: usize, loaded: bool },
    /// 标签页集合或激活项变化。
    TabsChanged { active: Option<String> },
    /// 连接状态迁移。
    ConnectionChanged { connected: bool, reconnecting: bool },
    /// 会话被清空（登出或凭据失效）。
    SessionCleared,
}

/// 基于 `tokio::sync::broadcast` 的事件总线。
///
/// # 契约说明（What）
/// - `publish` 永不失败：没有订阅者时事件被静默丢弃；
/// - 订阅者落后超过容量时会收到 `Lagged`，由订阅者自行决定是否全量刷新。
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<WardenEvent>,
}

impl EventBus {
    /// 以指定缓冲容量创建总线。
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// 订阅后续事件。
    pub fn subscribe(&self) -> broadcast::Receiver<WardenEvent> {
        self.sender.subscribe()
    }

    /// 广播事件，返回收到事件的订阅者数量。
    pub fn publish(&self, event: WardenEvent) -> usize {
        tracing::trace!(target: targets::EVENTS, ?event, "publishing warden event");
        self.sender.send(event).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(WardenEvent::SessionCleared), 0);

        let mut rx = bus.subscribe();
        let delivered = bus.publish(WardenEvent::TabsChanged {
            active: Some("Home".into()),
        });
        assert_eq!(delivered, 1);
        assert_eq!(
            rx.recv().await.expect("event"),
            WardenEvent::TabsChanged {
                active: Some("Home".into())
            }
        );
    }

    #[test]
    #[traced_test]
    fn publishing_logs_under_the_events_target() {
        let bus = EventBus::new(4);
        bus.publish(WardenEvent::SessionCleared);
        assert!(logs_contain("warden::events"));
        assert!(logs_contain("SessionCleared"));
    }
}
