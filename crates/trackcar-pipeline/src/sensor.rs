//! 采样任务
//!
//! 按固定周期读取三路灰度传感器，把原始值连同采样时刻发布到
//! raw_bus 邮箱。读取失败只计数不中断；致命硬件错误（设备拔出、
//! 权限丢失）会清除运行标志，联动整个管线退出。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{error, trace, warn};
use trackcar_hal::{GrayscaleAdapter, HalError};

use crate::mailbox::Mailbox;
use crate::metrics::PipelineMetrics;
use crate::sample::RawSample;

/// 采样线程主循环
///
/// # 参数
/// - `sensor`: 灰度传感器适配器
/// - `raw_bus`: 原始采样邮箱（写端）
/// - `period`: 采样周期
/// - `is_running`: 运行标志（用于生命周期联动）
/// - `metrics`: 运行计数器
pub fn sensor_loop(
    mut sensor: impl GrayscaleAdapter,
    raw_bus: Arc<Mailbox<RawSample>>,
    period: Duration,
    is_running: Arc<AtomicBool>,
    metrics: Arc<PipelineMetrics>,
) {
    // 设置线程优先级（可选 feature）
    #[cfg(feature = "realtime")]
    {
        use thread_priority::*;
        use tracing::info;

        match set_current_thread_priority(ThreadPriority::Max) {
            Ok(_) => {
                info!("Sensor thread priority set to MAX (realtime)");
            },
            Err(e) => {
                warn!("Failed to set sensor thread priority: {}", e);
            },
        }
    }

    loop {
        // Acquire: If we see false, we must see all cleanup writes from other threads
        if !is_running.load(Ordering::Acquire) {
            trace!("Sensor thread: is_running flag is false, exiting");
            break;
        }

        let cycle_start = Instant::now();

        match sensor.read_triple() {
            Ok((left, middle, right)) => {
                raw_bus.write(RawSample::new([left, middle, right]));
                PipelineMetrics::incr(&metrics.raw_samples);
            },
            Err(HalError::Device(ref device_err)) if device_err.is_fatal() => {
                error!("Sensor thread: Fatal device error: {}", device_err);
                PipelineMetrics::incr(&metrics.read_errors);
                // Release: All writes before this are visible to threads that see the false value
                is_running.store(false, Ordering::Release);
                break;
            },
            Err(e) => {
                // 瞬时读取失败，保留邮箱里的旧值，下游按陈旧数据处理
                warn!("Sensor thread: read error: {}", e);
                PipelineMetrics::incr(&metrics.read_errors);
            },
        }

        // 剩余周期睡眠；读取超时导致的超期周期立即进入下一轮
        let elapsed = cycle_start.elapsed();
        if let Some(remainder) = period.checked_sub(elapsed) {
            spin_sleep::sleep(remainder);
        }
    }

    trace!("Sensor thread: loop exited");
}
