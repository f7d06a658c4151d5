//! # TrackCar 硬件抽象层
//!
//! 提供统一的传感器/执行器接口抽象。管线核心只依赖本层的 trait，
//! 具体硬件后端（robot-hat ADC、PWM 舵机/电机驱动等）由实现方提供。
//!
//! 内置 [`sim`] 模块提供无硬件的轨迹仿真后端，用于 CLI 演示和集成测试。

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

pub mod sim;

pub use sim::{SimConfig, SimDrive, SimGrayscale, SimVehicle};

/// 硬件抽象层统一错误类型
#[derive(Error, Debug)]
pub enum HalError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(#[from] HalDeviceError),
    #[error("Read timeout")]
    Timeout,
}

/// 设备/后端错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalDeviceErrorKind {
    Unknown,
    NotFound,
    NoDevice,
    AccessDenied,
    InvalidReading,
    Backend,
}

/// 结构化设备错误
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct HalDeviceError {
    pub kind: HalDeviceErrorKind,
    pub message: String,
}

impl HalDeviceError {
    pub fn new(kind: HalDeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            HalDeviceErrorKind::NoDevice
                | HalDeviceErrorKind::AccessDenied
                | HalDeviceErrorKind::NotFound
        )
    }
}

impl From<String> for HalDeviceError {
    fn from(message: String) -> Self {
        Self::new(HalDeviceErrorKind::Unknown, message)
    }
}

impl From<&str> for HalDeviceError {
    fn from(message: &str) -> Self {
        Self::new(HalDeviceErrorKind::Unknown, message)
    }
}

/// 三路灰度（反射率）传感器适配器
///
/// 返回值顺序固定为（左、中、右），单位为后端的原始 ADC 量纲。
/// 读取失败属于瞬态条件：调用方跳过本周期即可，不应升级为致命错误。
pub trait GrayscaleAdapter {
    fn read_triple(&mut self) -> Result<(f64, f64, f64), HalError>;
}

/// 行驶/转向执行器适配器
///
/// 所有指令均为 fire-and-forget：管线核心记录失败日志但不依赖返回值
/// 做控制决策。`stop()` 必须幂等。
pub trait DriveAdapter {
    /// 设置转向舵机角度（度，0 为正中）
    fn set_steering_angle(&mut self, degrees: f64) -> Result<(), HalError>;
    /// 前进（power 为 0-100 的占空比百分数）
    fn drive_forward(&mut self, power: u8) -> Result<(), HalError>;
    /// 倒车
    fn drive_backward(&mut self, power: u8) -> Result<(), HalError>;
    /// 停车（幂等）
    fn stop(&mut self) -> Result<(), HalError>;
}

// 共享句柄的透传实现：同一个物理传感器需要同时被采样任务
// 和控制任务的恢复轮询访问（各自持锁仅微秒级）。
impl<G: GrayscaleAdapter + ?Sized> GrayscaleAdapter for Arc<Mutex<G>> {
    fn read_triple(&mut self) -> Result<(f64, f64, f64), HalError> {
        self.lock().read_triple()
    }
}

impl<D: DriveAdapter + ?Sized> DriveAdapter for Arc<Mutex<D>> {
    fn set_steering_angle(&mut self, degrees: f64) -> Result<(), HalError> {
        self.lock().set_steering_angle(degrees)
    }

    fn drive_forward(&mut self, power: u8) -> Result<(), HalError> {
        self.lock().drive_forward(power)
    }

    fn drive_backward(&mut self, power: u8) -> Result<(), HalError> {
        self.lock().drive_backward(power)
    }

    fn stop(&mut self) -> Result<(), HalError> {
        self.lock().stop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hal_device_error_display() {
        let err = HalDeviceError::new(HalDeviceErrorKind::NoDevice, "sensor unplugged");
        let msg = format!("{}", err);
        assert!(msg.contains("NoDevice") && msg.contains("sensor unplugged"));
    }

    #[test]
    fn test_hal_device_error_fatal_classification() {
        assert!(HalDeviceError::new(HalDeviceErrorKind::NoDevice, "x").is_fatal());
        assert!(HalDeviceError::new(HalDeviceErrorKind::AccessDenied, "x").is_fatal());
        assert!(HalDeviceError::new(HalDeviceErrorKind::NotFound, "x").is_fatal());
        assert!(!HalDeviceError::new(HalDeviceErrorKind::InvalidReading, "x").is_fatal());
        assert!(!HalDeviceError::new(HalDeviceErrorKind::Backend, "x").is_fatal());
    }

    #[test]
    fn test_from_str_defaults_to_unknown() {
        let err: HalDeviceError = "boom".into();
        assert_eq!(err.kind, HalDeviceErrorKind::Unknown);
    }

    struct CountingSensor {
        reads: usize,
    }

    impl GrayscaleAdapter for CountingSensor {
        fn read_triple(&mut self) -> Result<(f64, f64, f64), HalError> {
            self.reads += 1;
            Ok((1000.0, 300.0, 1000.0))
        }
    }

    #[test]
    fn test_shared_handle_delegates() {
        let shared = Arc::new(Mutex::new(CountingSensor { reads: 0 }));
        let mut a = shared.clone();
        let mut b = shared.clone();

        assert_eq!(a.read_triple().unwrap(), (1000.0, 300.0, 1000.0));
        assert_eq!(b.read_triple().unwrap(), (1000.0, 300.0, 1000.0));
        assert_eq!(shared.lock().reads, 2);
    }
}
