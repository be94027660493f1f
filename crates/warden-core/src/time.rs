//! 时间抽象模块，提供可注入的时钟接口，使退避、健康检查与重试节律在测试中可确定复现。
//!
//! # 模块定位（Why）
//! - 连接管理器的退避等待与动态路由初始化器的重试间隔都依赖“等待一段时间”的能力；
//!   若直接调用运行时的睡眠函数，测试只能真实地等待数秒。
//! - [`Clock`] trait 统一 `now` 与 `sleep` 两个原语，调用方只依赖 trait 即可在生产与测试之间切换。
//!
//! # 使用指引（How）
//! - 生产环境构造 [`SystemClock`] 并以 `Arc<dyn Clock>` 注入；
//! - 测试可在 `#[tokio::test(start_paused = true)]` 下直接使用 [`SystemClock`]（Tokio 会自动推进虚拟时间），
//!   或自行实现记录型时钟以断言等待序列。

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

/// `Sleep` 为时钟接口返回的统一延迟 Future 类型。
///
/// - Future 完成时表示指定的持续时间已经过去；
/// - 必须满足 `Send + 'static`，以便在 `tokio::spawn` 的后台任务中使用。
pub type Sleep = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// 抽象可注入的时钟。
///
/// # 接口约束（What）
/// - `now`：返回当前的单调时间点，实现者必须保证单调递增；
/// - `sleep`：返回一个在给定持续时间后完成的 Future，完成前至少等待所给时长。
pub trait Clock: Send + Sync + 'static {
    /// 返回当前的单调时间点。
    fn now(&self) -> Instant;

    /// 返回一个在指定持续时间后完成的睡眠 Future。
    fn sleep(&self, duration: Duration) -> Sleep;
}

/// 基于 Tokio 计时器的系统时钟。
///
/// `now` 取自 `tokio::time::Instant`，因此在 Tokio 暂停时间（`start_paused`）的测试中
/// 与 `sleep` 保持同一时间基准。
#[derive(Clone, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn sleep(&self, duration: Duration) -> Sleep {
        Box::pin(tokio::time::sleep(duration))
    }
}
