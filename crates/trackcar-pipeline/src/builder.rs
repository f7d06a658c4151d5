//! 管线构造器
//!
//! 链式配置入口。所有配置错误都在 [`PipelineBuilder::build`] 里、
//! 任何线程启动之前暴露；运行期不再有配置类失败。

use std::sync::Arc;

use parking_lot::Mutex;
use trackcar_hal::{DriveAdapter, GrayscaleAdapter};

use crate::config::{PipelineConfig, Polarity};
use crate::error::PipelineError;
use crate::supervisor::Pipeline;

/// [`Pipeline`] 的链式构造器
///
/// # Example
///
/// ```no_run
/// use trackcar_hal::{SimConfig, SimVehicle};
/// use trackcar_pipeline::{PipelineBuilder, Polarity};
///
/// let (sensor, drive) = SimVehicle::spawn(SimConfig::default());
/// let pipeline = PipelineBuilder::new()
///     .polarity(Polarity::Dark)
///     .response_factor(1.2)
///     .build(sensor, drive)
///     .expect("invalid pipeline configuration");
/// # drop(pipeline);
/// ```
#[derive(Debug, Clone, Default)]
pub struct PipelineBuilder {
    config: PipelineConfig,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 整体替换配置（通常来自 TOML 文件）
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// 线的明暗极性
    pub fn polarity(mut self, polarity: Polarity) -> Self {
        self.config.interpreter.polarity = polarity;
        self
    }

    /// 边沿判定灵敏度
    pub fn sensitivity(mut self, sensitivity: f64) -> Self {
        self.config.interpreter.sensitivity = sensitivity;
        self
    }

    /// 比例响应系数（0.6 温和 ~ 1.6 激进）
    pub fn response_factor(mut self, response_factor: f64) -> Self {
        self.config.controller.response_factor = response_factor;
        self
    }

    /// 微分阻尼系数（越大阻尼越强、振荡越少）
    pub fn damping_factor(mut self, damping_factor: f64) -> Self {
        self.config.controller.damping_factor = damping_factor;
        self
    }

    /// 当前累积的配置
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 校验配置并启动三个任务线程
    pub fn build<S, D>(self, sensor: S, drive: D) -> Result<Pipeline, PipelineError>
    where
        S: GrayscaleAdapter + Send + 'static,
        D: DriveAdapter + Send + 'static,
    {
        self.config.validate()?;

        let sensor: Arc<Mutex<dyn GrayscaleAdapter + Send>> = Arc::new(Mutex::new(sensor));
        let drive: Arc<Mutex<dyn DriveAdapter + Send>> = Arc::new(Mutex::new(drive));

        Ok(Pipeline::spawn(sensor, drive, self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_accumulates_settings() {
        let builder = PipelineBuilder::new()
            .polarity(Polarity::Light)
            .sensitivity(90.0)
            .response_factor(1.4)
            .damping_factor(1.0);

        let config = builder.config();
        assert_eq!(config.interpreter.polarity, Polarity::Light);
        assert_eq!(config.interpreter.sensitivity, 90.0);
        assert_eq!(config.controller.response_factor, 1.4);
        assert_eq!(config.controller.damping_factor, 1.0);
    }

    #[test]
    fn test_builder_default_matches_config_default() {
        assert_eq!(*PipelineBuilder::new().config(), PipelineConfig::default());
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        use trackcar_hal::{HalError, SimConfig, SimVehicle};

        struct NoopDrive;
        impl DriveAdapter for NoopDrive {
            fn set_steering_angle(&mut self, _degrees: f64) -> Result<(), HalError> {
                Ok(())
            }
            fn drive_forward(&mut self, _power: u8) -> Result<(), HalError> {
                Ok(())
            }
            fn drive_backward(&mut self, _power: u8) -> Result<(), HalError> {
                Ok(())
            }
            fn stop(&mut self) -> Result<(), HalError> {
                Ok(())
            }
        }

        let (sensor, _drive) = SimVehicle::spawn(SimConfig::default());
        let result = PipelineBuilder::new()
            .sensitivity(-1.0)
            .build(sensor, NoopDrive);
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    }
}
