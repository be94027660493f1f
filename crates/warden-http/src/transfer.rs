use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use warden_core::observability::targets;
use warden_core::{CoreError, ErrorCategory, codes};

use crate::error::HttpError;

/// 传输任务标识。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(u64);

impl TransferId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transfer#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransferKind {
    Download,
    Upload,
}

/// 传输任务状态。
///
/// 合法迁移：
/// - `Pending → Active | Cancelled`
/// - `Active → Completed | Failed | Cancelled | Paused`
/// - `Paused → Active | Cancelled`
///
/// `Completed`、`Failed`、`Cancelled` 为终态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransferStatus {
    Pending,
    Active,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TransferStatus {
    pub fn can_transition_to(self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        matches!(
            (self, next),
            (Pending, Active)
                | (Pending, Cancelled)
                | (Active, Completed)
                | (Active, Failed)
                | (Active, Cancelled)
                | (Active, Paused)
                | (Paused, Active)
                | (Paused, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransferError {
    #[error("{id}: cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        id: TransferId,
        from: TransferStatus,
        to: TransferStatus,
    },
    #[error("{id} was cancelled")]
    Cancelled { id: TransferId },
    #[error(transparent)]
    Http(#[from] HttpError),
}

impl From<TransferError> for CoreError {
    fn from(value: TransferError) -> Self {
        match value {
            TransferError::InvalidTransition { .. } => {
                CoreError::new(codes::TRANSFER_INVALID_TRANSITION, value.to_string())
                    .with_category(ErrorCategory::NonRetryable)
            }
            TransferError::Cancelled { .. } => {
                CoreError::new(codes::TRANSFER_CANCELLED, value.to_string())
            }
            TransferError::Http(err) => err.into(),
        }
    }
}

/// 某一时刻的任务快照。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferSnapshot {
    pub id: TransferId,
    pub kind: TransferKind,
    pub target: String,
    pub status: TransferStatus,
    pub transferred: u64,
    pub total: Option<u64>,
    pub error: Option<String>,
}

/// 传输任务句柄，可跨任务克隆共享。
///
/// # 教案式说明
/// - **意图 (Why)**：下载/上传往往由后台任务执行，而暂停、恢复、取消来自界面；句柄把二者解耦。
/// - **逻辑 (How)**：状态存放在 `tokio::sync::watch` 中，执行方在每个数据块之间调用
///   `checkpoint`：暂停时挂起等待状态变化，取消时立即返回错误。
/// - **契约 (What)**：所有迁移方法都先校验 [`TransferStatus::can_transition_to`]，非法迁移返回
///   [`TransferError::InvalidTransition`] 且不修改状态。
#[derive(Clone)]
pub struct TransferHandle {
    shared: Arc<Shared>,
}

struct Shared {
    id: TransferId,
    kind: TransferKind,
    target: String,
    status: watch::Sender<TransferStatus>,
    progress: Mutex<Progress>,
}

/// 进度计数；`total` 在响应未声明长度时为 `None`。
#[derive(Default)]
struct Progress {
    transferred: u64,
    total: Option<u64>,
    error: Option<String>,
}

impl TransferHandle {
    fn new(id: TransferId, kind: TransferKind, target: String) -> Self {
        let (status, _) = watch::channel(TransferStatus::Pending);
        Self {
            shared: Arc::new(Shared {
                id,
                kind,
                target,
                status,
                progress: Mutex::new(Progress::default()),
            }),
        }
    }

    pub fn id(&self) -> TransferId {
        self.shared.id
    }

    pub fn kind(&self) -> TransferKind {
        self.shared.kind
    }

    /// 传输目标路径。
    pub fn target(&self) -> &str {
        &self.shared.target
    }

    pub fn status(&self) -> TransferStatus {
        *self.shared.status.borrow()
    }

    pub fn snapshot(&self) -> TransferSnapshot {
        let progress = self.shared.progress.lock();
        TransferSnapshot {
            id: self.shared.id,
            kind: self.shared.kind,
            target: self.shared.target.clone(),
            status: self.status(),
            transferred: progress.transferred,
            total: progress.total,
            error: progress.error.clone(),
        }
    }

    /// 订阅状态变化。
    pub fn watch(&self) -> watch::Receiver<TransferStatus> {
        self.shared.status.subscribe()
    }

    pub fn start(&self) -> Result<(), TransferError> {
        self.transition(TransferStatus::Active)
    }

    pub fn pause(&self) -> Result<(), TransferError> {
        self.transition(TransferStatus::Paused)
    }

    pub fn resume(&self) -> Result<(), TransferError> {
        self.transition(TransferStatus::Active)
    }

    pub fn cancel(&self) -> Result<(), TransferError> {
        self.transition(TransferStatus::Cancelled)
    }

    pub fn complete(&self) -> Result<(), TransferError> {
        self.transition(TransferStatus::Completed)
    }

    pub fn fail(&self, message: impl Into<String>) -> Result<(), TransferError> {
        self.transition(TransferStatus::Failed)?;
        self.shared.progress.lock().error = Some(message.into());
        Ok(())
    }

    pub(crate) fn advance(&self, bytes: u64) -> u64 {
        let mut progress = self.shared.progress.lock();
        progress.transferred = progress.transferred.saturating_add(bytes);
        progress.transferred
    }

    pub(crate) fn set_total(&self, total: Option<u64>) {
        self.shared.progress.lock().total = total;
    }

    /// 数据块之间的检查点：暂停时挂起直到恢复或取消；取消时返回错误。
    pub(crate) async fn checkpoint(&self) -> Result<(), TransferError> {
        let mut rx = self.shared.status.subscribe();
        loop {
            let status = *rx.borrow_and_update();
            match status {
                TransferStatus::Paused => {}
                TransferStatus::Cancelled => {
                    return Err(TransferError::Cancelled { id: self.shared.id });
                }
                _ => return Ok(()),
            }
            if rx.changed().await.is_err() {
                return Err(TransferError::Cancelled { id: self.shared.id });
            }
        }
    }

    fn transition(&self, next: TransferStatus) -> Result<(), TransferError> {
        let mut outcome = Ok(());
        self.shared.status.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                outcome = Err(TransferError::InvalidTransition {
                    id: self.shared.id,
                    from: *current,
                    to: next,
                });
                false
            }
        });
        if outcome.is_ok() {
            tracing::debug!(
                target: targets::HTTP,
                transfer = %self.shared.id,
                status = ?next,
                "transfer state changed"
            );
        }
        outcome
    }
}

impl fmt::Debug for TransferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TransferHandle").field(&self.snapshot()).finish()
    }
}

/// 传输任务登记表。
#[derive(Clone, Default)]
pub struct TransferManager {
    inner: Arc<Registry>,
}

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    tasks: DashMap<TransferId, TransferHandle>,
}

impl TransferManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个处于 `Pending` 的任务。
    pub fn create(&self, kind: TransferKind, target: impl Into<String>) -> TransferHandle {
        let id = TransferId(self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let handle = TransferHandle::new(id, kind, target.into());
        self.inner.tasks.insert(id, handle.clone());
        handle
    }

    pub fn get(&self, id: TransferId) -> Option<TransferHandle> {
        self.inner.tasks.get(&id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: TransferId) -> Option<TransferHandle> {
        self.inner.tasks.remove(&id).map(|(_, handle)| handle)
    }

    /// 按标识升序列出全部任务快照。
    pub fn list(&self) -> Vec<TransferSnapshot> {
        let mut snapshots: Vec<_> = self
            .inner
            .tasks
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.id);
        snapshots
    }

    /// 移除所有已到达终态的任务，返回移除数量。
    pub fn prune_finished(&self) -> usize {
        let before = self.inner.tasks.len();
        self.inner
            .tasks
            .retain(|_, handle| !handle.status().is_terminal());
        before - self.inner.tasks.len()
    }

    pub fn len(&self) -> usize {
        self.inner.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.tasks.is_empty()
    }
}
