//! 管线配置
//!
//! 所有配置结构都带 `Default` 与 `serde(default)`，TOML 文件里
//! 只需写出想覆盖的字段。时间量统一以秒（f64）表示，便于序列化，
//! 需要 `Duration` 的地方通过访问器转换。

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// 线与地面的明暗关系
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    /// 深色线、浅色地面（读数低于基线表示线）
    #[default]
    Dark,
    /// 浅色线、深色地面
    Light,
}

impl Polarity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Polarity::Dark => "dark",
            Polarity::Light => "light",
        }
    }
}

impl FromStr for Polarity {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dark" => Ok(Polarity::Dark),
            "light" => Ok(Polarity::Light),
            _ => Err(PipelineError::UnknownPolarity {
                value: s.to_string(),
            }),
        }
    }
}

/// 解释任务配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    /// 边沿判定灵敏度：基线与读数之差超过该值视为压线
    pub sensitivity: f64,
    /// 线的明暗极性
    pub polarity: Polarity,
    /// 是否在未压线周期用 EWMA 持续校准基线
    pub auto_baseline: bool,
    /// 基线 EWMA 系数，范围 (0, 1]
    pub baseline_alpha: f64,
    /// 居中判定阈值：无边沿且最大强度低于该值视为线在正中
    pub strength_threshold: f64,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            sensitivity: 120.0,
            polarity: Polarity::Dark,
            auto_baseline: true,
            baseline_alpha: 0.02,
            strength_threshold: 850.0,
        }
    }
}

impl InterpreterConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(self.sensitivity.is_finite() && self.sensitivity > 0.0) {
            return Err(PipelineError::InvalidConfig(
                "sensitivity must be a positive finite number".to_string(),
            ));
        }
        if !(self.baseline_alpha > 0.0 && self.baseline_alpha <= 1.0) {
            return Err(PipelineError::InvalidConfig(
                "baseline_alpha must be in (0, 1]".to_string(),
            ));
        }
        if !(self.strength_threshold.is_finite() && self.strength_threshold > 0.0) {
            return Err(PipelineError::InvalidConfig(
                "strength_threshold must be a positive finite number".to_string(),
            ));
        }
        Ok(())
    }
}

/// 控制任务配置
///
/// PD 增益由此派生：`Kp = max_steering_angle * response_factor`，
/// `Kd = Kp * loop_period_s * damping_factor`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// 转向角饱和幅度（度）
    pub max_steering_angle: f64,
    /// 控制周期（秒）
    pub loop_period_s: f64,
    /// 比例响应系数
    pub response_factor: f64,
    /// 微分阻尼系数
    pub damping_factor: f64,
    /// 偏移死区：|offset| 低于该值按 0 处理
    pub deadband: f64,
    /// 转向角指数平滑系数，范围 (0, 1]
    pub smoothing_alpha: f64,
    /// 正常巡线时的前进功率
    pub drive_power: u8,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_steering_angle: 30.0,
            loop_period_s: 0.02,
            response_factor: 1.0,
            damping_factor: 0.8,
            deadband: 0.06,
            smoothing_alpha: 0.30,
            drive_power: 20,
        }
    }
}

impl ControllerConfig {
    pub fn loop_period(&self) -> Duration {
        Duration::from_secs_f64(self.loop_period_s)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(self.max_steering_angle.is_finite() && self.max_steering_angle > 0.0) {
            return Err(PipelineError::InvalidConfig(
                "max_steering_angle must be a positive finite number".to_string(),
            ));
        }
        if !(self.loop_period_s.is_finite() && self.loop_period_s > 0.0) {
            return Err(PipelineError::InvalidConfig(
                "loop_period_s must be a positive finite number".to_string(),
            ));
        }
        if !(self.response_factor.is_finite() && self.response_factor > 0.0) {
            return Err(PipelineError::InvalidConfig(
                "response_factor must be a positive finite number".to_string(),
            ));
        }
        if !(self.damping_factor.is_finite() && self.damping_factor >= 0.0) {
            return Err(PipelineError::InvalidConfig(
                "damping_factor must be a non-negative finite number".to_string(),
            ));
        }
        if !(self.deadband.is_finite() && (0.0..1.0).contains(&self.deadband)) {
            return Err(PipelineError::InvalidConfig(
                "deadband must be in [0, 1)".to_string(),
            ));
        }
        if !(self.smoothing_alpha > 0.0 && self.smoothing_alpha <= 1.0) {
            return Err(PipelineError::InvalidConfig(
                "smoothing_alpha must be in (0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

/// 丢线恢复机动配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// 倒车功率
    pub reverse_power: u8,
    /// 倒车时的转向幅度（度）；0 表示回正倒车，
    /// 非零时朝最近一次转向的同侧打轮
    pub steer_angle: f64,
    /// 恢复机动最长持续时间（秒），超时后放弃
    pub max_time_s: f64,
    /// 恢复期间传感器轮询周期（秒）
    pub poll_period_s: f64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            reverse_power: 30,
            steer_angle: 0.0,
            max_time_s: 2.5,
            poll_period_s: 0.01,
        }
    }
}

impl RecoveryConfig {
    pub fn max_time(&self) -> Duration {
        Duration::from_secs_f64(self.max_time_s)
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_secs_f64(self.poll_period_s)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(self.steer_angle.is_finite() && self.steer_angle >= 0.0) {
            return Err(PipelineError::InvalidConfig(
                "steer_angle must be a non-negative finite number".to_string(),
            ));
        }
        if !(self.max_time_s.is_finite() && self.max_time_s > 0.0) {
            return Err(PipelineError::InvalidConfig(
                "max_time_s must be a positive finite number".to_string(),
            ));
        }
        if !(self.poll_period_s.is_finite() && self.poll_period_s > 0.0) {
            return Err(PipelineError::InvalidConfig(
                "poll_period_s must be a positive finite number".to_string(),
            ));
        }
        Ok(())
    }
}

/// 管线整体配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 采样任务周期（秒）
    pub sensor_period_s: f64,
    /// 解释任务周期（秒）
    pub interpreter_period_s: f64,
    pub interpreter: InterpreterConfig,
    pub controller: ControllerConfig,
    pub recovery: RecoveryConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sensor_period_s: 0.02,
            interpreter_period_s: 0.02,
            interpreter: InterpreterConfig::default(),
            controller: ControllerConfig::default(),
            recovery: RecoveryConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn sensor_period(&self) -> Duration {
        Duration::from_secs_f64(self.sensor_period_s)
    }

    pub fn interpreter_period(&self) -> Duration {
        Duration::from_secs_f64(self.interpreter_period_s)
    }

    /// 校验所有子配置，构造管线前必须通过
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(self.sensor_period_s.is_finite() && self.sensor_period_s > 0.0) {
            return Err(PipelineError::InvalidConfig(
                "sensor_period_s must be a positive finite number".to_string(),
            ));
        }
        if !(self.interpreter_period_s.is_finite() && self.interpreter_period_s > 0.0) {
            return Err(PipelineError::InvalidConfig(
                "interpreter_period_s must be a positive finite number".to_string(),
            ));
        }
        self.interpreter.validate()?;
        self.controller.validate()?;
        self.recovery.validate()?;
        Ok(())
    }
}
