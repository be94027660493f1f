use thiserror::Error;
use warden_core::{CoreError, ErrorCategory, RetryAdvice, codes};

/// 连接层错误。
///
/// - `Destroyed`：管理器已销毁，调用方不应再重试；
/// - `Unavailable`：后端当前不可达，`reason` 为最近一次断线原因，属于可重试的瞬时故障。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("connection manager has been destroyed")]
    Destroyed,
    #[error("backend unavailable: {reason}")]
    Unavailable { reason: String },
}

impl From<ConnectionError> for CoreError {
    fn from(value: ConnectionError) -> Self {
        match value {
            ConnectionError::Destroyed => {
                CoreError::new(codes::CONNECTION_DESTROYED, value.to_string())
            }
            ConnectionError::Unavailable { .. } => {
                CoreError::new(codes::CONNECTION_UNAVAILABLE, value.to_string()).with_category(
                    ErrorCategory::Retryable(
                        RetryAdvice::after(std::time::Duration::from_secs(1))
                            .with_reason("backend unreachable"),
                    ),
                )
            }
        }
    }
}
