//! 控制任务与丢线恢复状态机
//!
//! 正常巡线（`Tracking`）：死区 -> 指数平滑 -> 自整定 PD 律 ->
//! 转向 + 前进。解释任务报告丢线后进入 `Recovering`：倒车并快速
//! 轮询传感器，直到重新看到线或超时，随后停车、清零控制器状态、
//! 交还 `Tracking`。恢复超时不是错误，丢线持续时外层会再次进入
//! 恢复。
//!
//! 执行器指令均为 fire-and-forget：失败记日志，不影响控制决策。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tracing::{debug, info, trace, warn};
use trackcar_hal::{DriveAdapter, GrayscaleAdapter, HalError};

use crate::config::{PipelineConfig, Polarity, RecoveryConfig};
use crate::mailbox::Mailbox;
use crate::metrics::PipelineMetrics;
use crate::sample::OffsetSample;

/// 自整定 PD 增益
///
/// `Kp = max_steering_angle * response_factor`，
/// `Kd = Kp * loop_period_s * damping_factor`。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PdGains {
    pub kp: f64,
    pub kd: f64,
}

impl PdGains {
    pub fn derive(config: &crate::config::ControllerConfig) -> Self {
        let kp = config.max_steering_angle * config.response_factor;
        let kd = kp * config.loop_period_s * config.damping_factor;
        Self { kp, kd }
    }
}

/// 最近一次的转向方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnDirection {
    Left,
    Right,
}

impl TurnDirection {
    /// 转向角符号：左负右正
    pub fn sign(&self) -> f64 {
        match self {
            TurnDirection::Left => -1.0,
            TurnDirection::Right => 1.0,
        }
    }

    /// 从指令角度推断方向；接近零的角度不更新方向
    pub fn from_angle(degrees: f64) -> Option<Self> {
        if degrees > f64::EPSILON {
            Some(TurnDirection::Right)
        } else if degrees < -f64::EPSILON {
            Some(TurnDirection::Left)
        } else {
            None
        }
    }
}

/// 控制任务的状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    /// 正常闭环巡线
    Tracking,
    /// 丢线恢复机动进行中
    Recovering {
        started_at: Instant,
        last_turn: Option<TurnDirection>,
    },
}

/// 恢复机动的结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// 传感器重新看到线
    Reacquired,
    /// 达到最长恢复时间
    TimedOut,
    /// 运行标志被清除（管线关停）
    Cancelled,
}

/// PD 控制器
///
/// 状态（上次误差、平滑后偏移、首周期标志）由本结构独占，
/// 恢复机动前后通过 [`PdController::reset`] 清零。
pub struct PdController {
    gains: PdGains,
    max_angle: f64,
    dt: f64,
    deadband: f64,
    smoothing_alpha: f64,

    prev_error: f64,
    has_prev: bool,
    smoothed: f64,
    last_turn: Option<TurnDirection>,
}

impl PdController {
    pub fn new(config: &crate::config::ControllerConfig) -> Self {
        Self {
            gains: PdGains::derive(config),
            max_angle: config.max_steering_angle,
            dt: config.loop_period_s,
            deadband: config.deadband,
            smoothing_alpha: config.smoothing_alpha,
            prev_error: 0.0,
            has_prev: false,
            smoothed: 0.0,
            last_turn: None,
        }
    }

    pub fn gains(&self) -> PdGains {
        self.gains
    }

    /// 最近一次非零转向的方向；从未转向过为 `None`
    pub fn last_turn(&self) -> Option<TurnDirection> {
        self.last_turn
    }

    /// 清零内部状态（恢复机动结束后调用，避免微分项尖峰）
    pub fn reset(&mut self) {
        self.prev_error = 0.0;
        self.has_prev = false;
        self.smoothed = 0.0;
    }

    /// 死区 -> 指数平滑 -> PD -> 饱和裁剪，返回指令转向角（度）
    pub fn steering_angle(&mut self, offset: f64) -> f64 {
        let raw = if offset.abs() < self.deadband { 0.0 } else { offset };

        self.smoothed = self.smoothing_alpha * raw + (1.0 - self.smoothing_alpha) * self.smoothed;
        let error = self.smoothed;

        // 复位后的首个周期微分取零，避免虚假尖峰
        let derivative = if self.has_prev {
            (error - self.prev_error) / self.dt
        } else {
            self.has_prev = true;
            0.0
        };
        self.prev_error = error;

        let angle = (self.gains.kp * error + self.gains.kd * derivative)
            .clamp(-self.max_angle, self.max_angle);

        if let Some(direction) = TurnDirection::from_angle(angle) {
            self.last_turn = Some(direction);
        }
        angle
    }
}

/// 恢复轮询的压线判定：任一通道按极性越过阈值即算看到线
pub fn line_seen(triple: (f64, f64, f64), polarity: Polarity, threshold: f64) -> bool {
    let (left, middle, right) = triple;
    match polarity {
        Polarity::Dark => left < threshold || middle < threshold || right < threshold,
        Polarity::Light => left > threshold || middle > threshold || right > threshold,
    }
}

fn command(label: &str, result: Result<(), HalError>) {
    if let Err(e) = result {
        warn!("Drive command '{}' failed: {}", label, e);
    }
}

/// 执行一次有界的倒车恢复机动
///
/// 倒车并以 `poll_period` 轮询传感器，直到重新看到线、超时或
/// 运行标志被清除。所有退出路径都会发出 `stop()`。
pub fn run_recovery(
    sensor: &mut impl GrayscaleAdapter,
    drive: &mut impl DriveAdapter,
    config: &RecoveryConfig,
    polarity: Polarity,
    line_threshold: f64,
    started_at: Instant,
    last_turn: Option<TurnDirection>,
    is_running: &AtomicBool,
) -> RecoveryOutcome {
    command("stop", drive.stop());

    let steer = last_turn.map_or(0.0, |d| d.sign()) * config.steer_angle;
    command("set_steering_angle", drive.set_steering_angle(steer));
    command("drive_backward", drive.drive_backward(config.reverse_power));

    let max_time = config.max_time();
    let poll_period = config.poll_period();

    let outcome = loop {
        if !is_running.load(Ordering::Acquire) {
            break RecoveryOutcome::Cancelled;
        }

        // 轮询期间的读取失败按"未看到线"处理
        match sensor.read_triple() {
            Ok(triple) if line_seen(triple, polarity, line_threshold) => {
                trace!("Recovery: line reacquired at {:?}", triple);
                break RecoveryOutcome::Reacquired;
            },
            Ok(_) => {},
            Err(e) => {
                warn!("Recovery: sensor read failed: {}", e);
            },
        }

        if started_at.elapsed() >= max_time {
            break RecoveryOutcome::TimedOut;
        }

        // 不睡过最长恢复时间的边界
        let remaining = max_time.saturating_sub(started_at.elapsed());
        spin_sleep::sleep(poll_period.min(remaining));
    };

    command("stop", drive.stop());
    outcome
}

/// 控制线程主循环
///
/// # 参数
/// - `sensor`: 灰度传感器适配器（仅恢复轮询使用）
/// - `drive`: 行驶/转向执行器适配器
/// - `offset_bus`: 偏移邮箱（读端）
/// - `config`: 管线配置（控制 + 恢复 + 压线判定参数）
/// - `is_running`: 运行标志
/// - `metrics`: 运行计数器
pub fn controller_loop(
    mut sensor: impl GrayscaleAdapter,
    mut drive: impl DriveAdapter,
    offset_bus: Arc<Mailbox<OffsetSample>>,
    config: PipelineConfig,
    is_running: Arc<AtomicBool>,
    metrics: Arc<PipelineMetrics>,
) {
    // 设置线程优先级（可选 feature）
    #[cfg(feature = "realtime")]
    {
        use thread_priority::*;

        match set_current_thread_priority(ThreadPriority::Max) {
            Ok(_) => {
                info!("Controller thread priority set to MAX (realtime)");
            },
            Err(e) => {
                warn!("Failed to set controller thread priority: {}", e);
            },
        }
    }

    let mut controller = PdController::new(&config.controller);
    let polarity = config.interpreter.polarity;
    let line_threshold = config.interpreter.strength_threshold;
    let period = config.controller.loop_period();
    let mut state = RecoveryState::Tracking;

    debug!(
        "Controller thread: derived gains Kp={:.2}, Kd={:.3}",
        controller.gains().kp,
        controller.gains().kd
    );

    loop {
        // Acquire: If we see false, we must see all cleanup writes from other threads
        if !is_running.load(Ordering::Acquire) {
            trace!("Controller thread: is_running flag is false, exiting");
            break;
        }

        state = match state {
            RecoveryState::Tracking => {
                let cycle_start = Instant::now();
                PipelineMetrics::incr(&metrics.control_ticks);

                let next = match offset_bus.read() {
                    None => {
                        // 解释任务还没产出任何信号：保持安全怠速
                        command("stop", drive.stop());
                        command("set_steering_angle", drive.set_steering_angle(0.0));
                        RecoveryState::Tracking
                    },
                    Some(OffsetSample { offset: None, .. }) => {
                        PipelineMetrics::incr(&metrics.line_lost_events);
                        info!("Controller thread: line lost, starting recovery");
                        RecoveryState::Recovering {
                            started_at: Instant::now(),
                            last_turn: controller.last_turn(),
                        }
                    },
                    Some(OffsetSample {
                        offset: Some(offset),
                        ..
                    }) => {
                        let angle = controller.steering_angle(offset);
                        command("set_steering_angle", drive.set_steering_angle(angle));
                        command(
                            "drive_forward",
                            drive.drive_forward(config.controller.drive_power),
                        );
                        RecoveryState::Tracking
                    },
                };

                let elapsed = cycle_start.elapsed();
                if let Some(remainder) = period.checked_sub(elapsed) {
                    spin_sleep::sleep(remainder);
                }
                next
            },
            RecoveryState::Recovering {
                started_at,
                last_turn,
            } => {
                let outcome = run_recovery(
                    &mut sensor,
                    &mut drive,
                    &config.recovery,
                    polarity,
                    line_threshold,
                    started_at,
                    last_turn,
                    &is_running,
                );
                match outcome {
                    RecoveryOutcome::Reacquired => {
                        info!("Controller thread: recovery reacquired the line");
                        PipelineMetrics::incr(&metrics.recoveries_reacquired);
                    },
                    RecoveryOutcome::TimedOut => {
                        info!("Controller thread: recovery timed out, returning to tracking");
                        PipelineMetrics::incr(&metrics.recoveries_timed_out);
                    },
                    RecoveryOutcome::Cancelled => {
                        trace!("Controller thread: recovery cancelled by shutdown");
                    },
                }

                // 邮箱里可能还留着同一条丢线消息；持续丢线时
                // 下个周期会再次进入恢复
                controller.reset();
                RecoveryState::Tracking
            },
        };
    }

    trace!("Controller thread: loop exited");
}
