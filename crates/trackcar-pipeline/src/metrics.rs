//! 管线运行计数器
//!
//! 全部为 `Relaxed` 原子计数，热路径上只做 `fetch_add`，
//! 诊断时通过 [`PipelineMetrics::snapshot`] 一次性读出。

use std::sync::atomic::{AtomicU64, Ordering};

/// 各任务共享的运行计数器
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// 成功发布的原始采样数
    pub raw_samples: AtomicU64,
    /// 传感器读取失败数
    pub read_errors: AtomicU64,
    /// 发布的偏移更新数
    pub offset_updates: AtomicU64,
    /// 解释任务因原始采样未更新而跳过的周期数
    pub stale_skips: AtomicU64,
    /// 控制任务执行的周期数
    pub control_ticks: AtomicU64,
    /// 丢线事件数（进入恢复机动的次数）
    pub line_lost_events: AtomicU64,
    /// 重新捕获线而结束的恢复次数
    pub recoveries_reacquired: AtomicU64,
    /// 超时放弃的恢复次数
    pub recoveries_timed_out: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// 读出所有计数器的一致性不作保证的快照
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            raw_samples: self.raw_samples.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            offset_updates: self.offset_updates.load(Ordering::Relaxed),
            stale_skips: self.stale_skips.load(Ordering::Relaxed),
            control_ticks: self.control_ticks.load(Ordering::Relaxed),
            line_lost_events: self.line_lost_events.load(Ordering::Relaxed),
            recoveries_reacquired: self.recoveries_reacquired.load(Ordering::Relaxed),
            recoveries_timed_out: self.recoveries_timed_out.load(Ordering::Relaxed),
        }
    }
}

/// [`PipelineMetrics`] 某一时刻的普通值快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub raw_samples: u64,
    pub read_errors: u64,
    pub offset_updates: u64,
    pub stale_skips: u64,
    pub control_ticks: u64,
    pub line_lost_events: u64,
    pub recoveries_reacquired: u64,
    pub recoveries_timed_out: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_increments() {
        let metrics = PipelineMetrics::new();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());

        PipelineMetrics::incr(&metrics.raw_samples);
        PipelineMetrics::incr(&metrics.raw_samples);
        PipelineMetrics::incr(&metrics.line_lost_events);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.raw_samples, 2);
        assert_eq!(snapshot.line_lost_events, 1);
        assert_eq!(snapshot.read_errors, 0);
    }
}
