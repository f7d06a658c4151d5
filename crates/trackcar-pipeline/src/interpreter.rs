//! 解释任务
//!
//! 把三路原始反射率转换成横向偏移信号：
//!
//! 1. 基线 EWMA 跟踪环境光漂移（慢于线过渡的时间尺度）；
//! 2. 相邻通道差分做边沿检测（对比度判定）；
//! 3. 按极性把读数映射为"线强度"（阈值裁剪）；
//! 4. 强度质心落在 [-1, 0, +1] 位置轴上得到偏移。
//!
//! 无强度且无边沿时输出 `None`（丢线）；有微弱强度但无边沿时
//! 按正中处理，抑制执行器抖动。
//!
//! 质心符号约定：左通道强度大时质心为负。该符号与物理转向方向
//! 的对应关系需在实车标定时确认。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::config::{InterpreterConfig, Polarity};
use crate::mailbox::Mailbox;
use crate::metrics::PipelineMetrics;
use crate::sample::{OffsetSample, RawSample};

const LOST_EPSILON: f64 = 1e-6;
const CENTROID_EPSILON: f64 = 1e-9;

/// 原始采样到偏移信号的转换器
///
/// 基线是本结构的私有状态，首个采样直接作为种子，之后按
/// `baseline = (1-α)·baseline + α·triple` 逐周期收敛。
pub struct Interpreter {
    config: InterpreterConfig,
    baseline: Option<[f64; 3]>,
}

impl Interpreter {
    pub fn new(config: InterpreterConfig) -> Self {
        Self {
            config,
            baseline: None,
        }
    }

    /// 当前基线；尚未处理过任何采样时为 `None`
    pub fn baseline(&self) -> Option<[f64; 3]> {
        self.baseline
    }

    fn update_baseline(&mut self, triple: &[f64; 3]) {
        match &mut self.baseline {
            None => self.baseline = Some(*triple),
            Some(baseline) => {
                let alpha = self.config.baseline_alpha;
                for i in 0..3 {
                    baseline[i] = (1.0 - alpha) * baseline[i] + alpha * triple[i];
                }
            },
        }
    }

    /// 单个采样的解释结果：偏移 [-1, 1]，丢线时为 `None`
    pub fn process(&mut self, triple: [f64; 3]) -> Option<f64> {
        let [left, middle, right] = triple;

        if self.config.auto_baseline {
            self.update_baseline(&triple);
        }

        // 相邻差分边沿检测
        let edge_detected = (left - middle).abs().max((middle - right).abs())
            >= self.config.sensitivity;

        // 极性感知的线强度（阈值裁剪）
        let threshold = self.config.strength_threshold;
        let strength = |v: f64| -> f64 {
            match self.config.polarity {
                Polarity::Dark => (threshold - v).max(0.0),
                Polarity::Light => (v - threshold).max(0.0),
            }
        };
        let (s_left, s_middle, s_right) = (strength(left), strength(middle), strength(right));
        let total = s_left + s_middle + s_right;

        // 无强度且无边沿：丢线
        if total < LOST_EPSILON && !edge_detected {
            return None;
        }

        // 无边沿且强度微弱：按正中处理，抑制抖动
        if !edge_detected && s_left.max(s_middle).max(s_right) < self.config.sensitivity {
            return Some(0.0);
        }

        // 强度质心，位置轴 [-1, 0, +1]
        let centroid = (-s_left + s_right) / (total + CENTROID_EPSILON);
        Some(centroid.clamp(-1.0, 1.0))
    }
}

/// 解释线程主循环
///
/// 时间戳与上次处理的采样相同（或邮箱为空）时跳过本周期，
/// 实际处理速率被钳制在采样任务的真实产出速率上。
///
/// # 参数
/// - `interpreter`: 转换器（独占状态）
/// - `raw_bus`: 原始采样邮箱（读端）
/// - `offset_bus`: 偏移邮箱（写端）
/// - `period`: 解释周期
/// - `is_running`: 运行标志
/// - `metrics`: 运行计数器
pub fn interpreter_loop(
    mut interpreter: Interpreter,
    raw_bus: Arc<Mailbox<RawSample>>,
    offset_bus: Arc<Mailbox<OffsetSample>>,
    period: Duration,
    is_running: Arc<AtomicBool>,
    metrics: Arc<PipelineMetrics>,
) {
    let mut last_processed: Option<Instant> = None;

    loop {
        // Acquire: If we see false, we must see all cleanup writes from other threads
        if !is_running.load(Ordering::Acquire) {
            trace!("Interpreter thread: is_running flag is false, exiting");
            break;
        }

        let cycle_start = Instant::now();

        match raw_bus.read() {
            Some(sample) if last_processed != Some(sample.timestamp) => {
                last_processed = Some(sample.timestamp);
                let offset = interpreter.process(sample.triple);
                offset_bus.write(OffsetSample::new(offset));
                PipelineMetrics::incr(&metrics.offset_updates);
            },
            _ => {
                // 采样间隙属于正常情况，保留下游邮箱里的旧值
                PipelineMetrics::incr(&metrics.stale_skips);
            },
        }

        let elapsed = cycle_start.elapsed();
        if let Some(remainder) = period.checked_sub(elapsed) {
            spin_sleep::sleep(remainder);
        }
    }

    trace!("Interpreter thread: loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn dark_interpreter() -> Interpreter {
        Interpreter::new(InterpreterConfig::default())
    }

    #[test]
    fn test_uniform_gray_is_centered() {
        // 三路同为 500：强度均为 350，无边沿，max 强度超过灵敏度，
        // 质心为 0
        let mut interp = dark_interpreter();
        assert_eq!(interp.process([500.0, 500.0, 500.0]), Some(0.0));
    }

    #[test]
    fn test_line_under_left_sensor_saturates_negative() {
        // 左 200、中右 900：强度 (650, 0, 0)，边沿 700 >= 120，
        // 质心 -650/650 = -1.0
        let mut interp = dark_interpreter();
        let offset = interp.process([200.0, 900.0, 900.0]).unwrap();
        assert!((offset - (-1.0)).abs() < 1e-6);
    }

    #[test]
    fn test_bright_floor_is_lost() {
        // 三路同为 1000：无强度、无边沿，丢线
        let mut interp = dark_interpreter();
        assert_eq!(interp.process([1000.0, 1000.0, 1000.0]), None);
    }

    #[test]
    fn test_offset_is_always_clamped() {
        let mut interp = dark_interpreter();
        for triple in [
            [0.0, 0.0, 0.0],
            [0.0, 850.0, 850.0],
            [850.0, 850.0, 0.0],
            [100.0, 500.0, 840.0],
            [840.0, 500.0, 100.0],
        ] {
            if let Some(offset) = interp.process(triple) {
                assert!((-1.0..=1.0).contains(&offset), "offset {} out of range", offset);
            }
        }
    }

    #[test]
    fn test_light_polarity_mirrors_strength() {
        let mut interp = Interpreter::new(InterpreterConfig {
            polarity: Polarity::Light,
            ..InterpreterConfig::default()
        });
        // 浅色线在右侧：右通道高于阈值
        let offset = interp.process([300.0, 300.0, 1000.0]).unwrap();
        assert!((offset - 1.0).abs() < 1e-6);
        // 全部低于阈值且无边沿：丢线
        assert_eq!(interp.process([300.0, 300.0, 300.0]), None);
    }

    #[test]
    fn test_weak_strength_without_edge_reads_centered() {
        // 强度 (100, 100, 100)，均低于灵敏度 120，无边沿
        let mut interp = dark_interpreter();
        assert_eq!(interp.process([750.0, 750.0, 750.0]), Some(0.0));
    }

    #[test]
    fn test_baseline_seeds_then_converges() {
        let mut interp = dark_interpreter();
        assert_eq!(interp.baseline(), None);

        interp.process([500.0, 500.0, 500.0]);
        assert_eq!(interp.baseline(), Some([500.0, 500.0, 500.0]));

        // 环境变亮后基线单调向新读数收敛，且保持在两者之间
        let mut previous = 500.0;
        for _ in 0..200 {
            interp.process([700.0, 700.0, 700.0]);
            let current = interp.baseline().unwrap()[0];
            assert!(current > previous && current < 700.0);
            previous = current;
        }
    }

    #[test]
    fn test_disabled_baseline_stays_unset() {
        let mut interp = Interpreter::new(InterpreterConfig {
            auto_baseline: false,
            ..InterpreterConfig::default()
        });
        interp.process([500.0, 500.0, 500.0]);
        assert_eq!(interp.baseline(), None);
    }

    #[test]
    fn test_loop_skips_duplicate_timestamps() {
        let raw_bus = Arc::new(Mailbox::new());
        let offset_bus = Arc::new(Mailbox::new());
        let is_running = Arc::new(AtomicBool::new(true));
        let metrics = Arc::new(PipelineMetrics::new());

        // 只写入一次：循环应只处理一次，其余周期计入 stale_skips
        raw_bus.write(RawSample::new([500.0, 500.0, 500.0]));

        let handle = {
            let raw_bus = raw_bus.clone();
            let offset_bus = offset_bus.clone();
            let is_running = is_running.clone();
            let metrics = metrics.clone();
            thread::spawn(move || {
                interpreter_loop(
                    dark_interpreter(),
                    raw_bus,
                    offset_bus,
                    Duration::from_millis(1),
                    is_running,
                    metrics,
                );
            })
        };

        thread::sleep(Duration::from_millis(50));
        is_running.store(false, Ordering::Release);
        handle.join().unwrap();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.offset_updates, 1);
        assert!(snapshot.stale_skips >= 1);
        assert_eq!(offset_bus.read().unwrap().offset, Some(0.0));
    }
}
