//! 管线消息类型定义
//!
//! 邮箱里只保留最新一条消息，消息一经发布即不可变，
//! 被下一次写入整体取代。

use std::time::Instant;

/// 原始反射率采样（采样任务 -> 解释任务）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    /// 采样时刻（单调时钟）
    pub timestamp: Instant,
    /// 三路原始值（左、中、右）
    pub triple: [f64; 3],
}

impl RawSample {
    pub fn new(triple: [f64; 3]) -> Self {
        Self {
            timestamp: Instant::now(),
            triple,
        }
    }
}

/// 横向偏移采样（解释任务 -> 控制任务）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffsetSample {
    /// 发布时刻（单调时钟）
    pub timestamp: Instant,
    /// 横向偏移，范围 [-1.0, 1.0]；本周期未检测到线时为 `None`
    pub offset: Option<f64>,
}

impl OffsetSample {
    pub fn new(offset: Option<f64>) -> Self {
        Self {
            timestamp: Instant::now(),
            offset,
        }
    }

    /// 是否为丢线信号
    pub fn is_lost(&self) -> bool {
        self.offset.is_none()
    }
}
