use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use warden_core::observability::targets;

use crate::state::ConnectionState;

/// 状态迁移监听者。收到的是迁移完成后的快照。
pub type ConnectionListener = Arc<dyn Fn(&ConnectionState) + Send + Sync + 'static>;

/// 订阅标识，用于退订。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// 监听者登记表。
///
/// # 契约说明（What）
/// - `notify` 在调用方线程上同步、按登记顺序调用每个监听者；
/// - 调用前先克隆列表并释放锁，监听者内部可以安全地再次订阅或退订；
/// - 单个监听者 panic 被隔离并记录，其余监听者照常收到通知。
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next_id: AtomicU64,
    entries: Mutex<Vec<(ListenerId, ConnectionListener)>>,
}

impl ListenerRegistry {
    pub(crate) fn subscribe(&self, listener: ConnectionListener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().push((id, listener));
        id
    }

    pub(crate) fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub(crate) fn notify(&self, snapshot: &ConnectionState) {
        let listeners: Vec<_> = self
            .entries
            .lock()
            .iter()
            .map(|(id, listener)| (*id, Arc::clone(listener)))
            .collect();
        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(snapshot))).is_err() {
                tracing::warn!(
                    target: targets::CONNECTION,
                    listener = id.0,
                    "connection listener panicked; continuing fan-out"
                );
            }
        }
    }
}
