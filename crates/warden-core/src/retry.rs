use std::time::Duration;

/// 退避策略：根据第 `n` 次尝试计算下一次等待时长。
///
/// # 教案式说明
/// - **意图（Why）**：连接管理器的重连循环与动态路由初始化器的重试循环都需要“逐次拉长的等待”，
///   若各自手写公式，极易出现溢出或忘记封顶。本类型集中表达两种节律并保证上限。
/// - **契约（What）**：
///   - `attempt` 从 1 开始计数；传入 0 按 1 处理；
///   - 返回值关于 `attempt` 单调不减，且不超过 `cap`；
///   - 计算全程使用饱和运算，任意大的 `attempt` 都不会 panic。
/// - **实现（How）**：
///   - `Exponential`：`base * 2^(attempt-1)`，指数部分以 `checked_shl` 防溢出，溢出即视为触顶；
///   - `Linear`：`step * attempt`，用于“第 k 次重试等待 k 秒”这类线性节律。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// 指数退避，等待时长逐次翻倍直至 `cap`。
    Exponential { base: Duration, cap: Duration },
    /// 线性退避，等待时长按 `step` 递增直至 `cap`。
    Linear { step: Duration, cap: Duration },
}

impl BackoffPolicy {
    /// 构造指数退避策略。
    pub const fn exponential(base: Duration, cap: Duration) -> Self {
        Self::Exponential { base, cap }
    }

    /// 构造线性退避策略。
    pub const fn linear(step: Duration, cap: Duration) -> Self {
        Self::Linear { step, cap }
    }

    /// 策略的等待上限。
    pub fn cap(&self) -> Duration {
        match self {
            Self::Exponential { cap, .. } | Self::Linear { cap, .. } => *cap,
        }
    }

    /// 计算第 `attempt` 次尝试失败后的等待时长。
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let raw = match self {
            Self::Exponential { base, .. } => {
                let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
                base.saturating_mul(factor)
            }
            Self::Linear { step, .. } => step.saturating_mul(attempt),
        };
        raw.min(self.cap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_doubles_then_caps() {
        let policy = BackoffPolicy::exponential(Duration::from_millis(500), Duration::from_secs(5));
        let delays: Vec<_> = (1..=6).map(|n| policy.delay_for(n)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(5),
                Duration::from_secs(5),
            ]
        );
    }

    #[test]
    fn linear_matches_retry_schedule() {
        let policy = BackoffPolicy::linear(Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3), Duration::from_secs(3));
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        let policy = BackoffPolicy::exponential(Duration::from_secs(1), Duration::from_secs(60));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(60));
    }
}
