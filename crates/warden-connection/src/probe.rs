use std::panic::AssertUnwindSafe;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use warden_core::observability::targets;

/// 健康探测契约。
///
/// # 教案式说明
/// - **意图 (Why)**：连接管理器只关心“后端此刻是否健康”，探测手段（HTTP、TCP、RPC）由实现者决定；
///   通过 trait 注入，测试可以用脚本化的探测替代真实网络。
/// - **契约 (What)**：
///   - 返回 `Ok(())` 表示健康；任何 `Err` 都视为不健康；
///   - 实现者无需自行处理超时与 panic，二者由 [`run_probe`] 统一兜底；
///   - 探测应保持轻量，不得带有副作用。
#[async_trait]
pub trait HealthProbe: Send + Sync + 'static {
    async fn probe(&self) -> warden_core::Result<()>;
}

/// 以有界超时执行一次探测，并把所有失败形态收敛为 `false`。
///
/// # 契约 (What)
/// - 成功：探测在 `timeout` 内返回 `Ok(())`；
/// - 失败：返回 `Err`、超时或 panic，三者都只记录日志，绝不向调用方传播。
pub async fn run_probe(probe: &dyn HealthProbe, timeout: Duration) -> bool {
    let guarded = AssertUnwindSafe(probe.probe()).catch_unwind();
    match tokio::time::timeout(timeout, guarded).await {
        Ok(Ok(Ok(()))) => true,
        Ok(Ok(Err(err))) => {
            tracing::debug!(target: targets::CONNECTION, error = %err, "health probe reported failure");
            false
        }
        Ok(Err(_)) => {
            tracing::warn!(target: targets::CONNECTION, "health probe panicked");
            false
        }
        Err(_) => {
            tracing::debug!(
                target: targets::CONNECTION,
                timeout_ms = timeout.as_millis() as u64,
                "health probe timed out"
            );
            false
        }
    }
}
