//! 轨迹仿真后端
//!
//! 在一条沿 x 轴铺设的深色线上模拟小车的横向运动学，
//! 把 [`GrayscaleAdapter`] 和 [`DriveAdapter`] 实现为共享同一个
//! 仿真世界的两个句柄。用于 CLI 演示和无硬件集成测试。
//!
//! 量纲约定与常见三路灰度模块一致：地板反射率约 1000，深色线约 300。

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rand::Rng;
use tracing::trace;

use crate::{DriveAdapter, GrayscaleAdapter, HalError};

/// 单位功率对应的车速（m/s）：power=20 约 0.2 m/s
const SPEED_PER_POWER: f64 = 0.01;
/// 前后轴距（米）
const WHEELBASE_M: f64 = 0.095;
/// 灰度传感器排相对后轴的前视距离（米）
const SENSOR_LOOKAHEAD_M: f64 = 0.08;
/// 相邻传感器间距（米）
const SENSOR_SPACING_M: f64 = 0.014;
/// 线的半宽（米）
const LINE_HALF_WIDTH_M: f64 = 0.015;
/// 航向角限幅，防止积分发散
const MAX_HEADING_RAD: f64 = 1.2;

/// 仿真参数
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// 初始横向偏差（米，正 = 小车在线右侧）
    pub initial_lateral_m: f64,
    /// 传感器读数噪声幅度（均匀分布，± 该值）
    pub noise_amplitude: f64,
    /// 地板反射率电平
    pub floor_level: f64,
    /// 线反射率电平
    pub line_level: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            initial_lateral_m: 0.0,
            noise_amplitude: 6.0,
            floor_level: 1000.0,
            line_level: 300.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Motion {
    Stopped,
    Forward(u8),
    Backward(u8),
}

/// 仿真世界状态（由传感器/执行器句柄共享）
struct SimWorld {
    cfg: SimConfig,
    /// 小车中心相对线中心的横向偏差（米）
    lateral_m: f64,
    /// 航向角（弧度，0 = 沿线方向）
    heading_rad: f64,
    steering_deg: f64,
    motion: Motion,
    last_step: Instant,
}

impl SimWorld {
    fn new(cfg: SimConfig) -> Self {
        Self {
            lateral_m: cfg.initial_lateral_m,
            cfg,
            heading_rad: 0.0,
            steering_deg: 0.0,
            motion: Motion::Stopped,
            last_step: Instant::now(),
        }
    }

    /// 按经过的真实时间积分一步横向运动学
    fn step(&mut self) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_step).as_secs_f64();
        self.last_step = now;

        let v = match self.motion {
            Motion::Stopped => 0.0,
            Motion::Forward(p) => p as f64 * SPEED_PER_POWER,
            Motion::Backward(p) => -(p as f64) * SPEED_PER_POWER,
        };
        if v == 0.0 || dt <= 0.0 {
            return;
        }

        let steer_rad = self.steering_deg.to_radians();
        self.heading_rad += v / WHEELBASE_M * steer_rad.tan() * dt;
        self.heading_rad = self.heading_rad.clamp(-MAX_HEADING_RAD, MAX_HEADING_RAD);
        self.lateral_m += v * self.heading_rad.sin() * dt;
    }

    /// 线中心在传感器排坐标系中的横向位置（米）
    fn line_under_bar(&self) -> f64 {
        -(self.lateral_m + SENSOR_LOOKAHEAD_M * self.heading_rad.sin())
    }

    /// 单个传感器的反射率读数（不含噪声）
    fn sensor_value(&self, sensor_offset_m: f64) -> f64 {
        let distance = (self.line_under_bar() - sensor_offset_m).abs();
        let coverage = (1.0 - distance / LINE_HALF_WIDTH_M).clamp(0.0, 1.0);
        self.cfg.floor_level - coverage * (self.cfg.floor_level - self.cfg.line_level)
    }

    fn read_triple(&mut self) -> (f64, f64, f64) {
        self.step();
        let mut rng = rand::thread_rng();
        let mut sample = |offset: f64| -> f64 {
            let noise = if self.cfg.noise_amplitude > 0.0 {
                rng.gen_range(-self.cfg.noise_amplitude..=self.cfg.noise_amplitude)
            } else {
                0.0
            };
            (self.sensor_value(offset) + noise).max(0.0)
        };
        (
            sample(-SENSOR_SPACING_M),
            sample(0.0),
            sample(SENSOR_SPACING_M),
        )
    }
}

/// 仿真车辆：一次创建，拆分为传感器句柄和执行器句柄
pub struct SimVehicle;

impl SimVehicle {
    pub fn spawn(cfg: SimConfig) -> (SimGrayscale, SimDrive) {
        let world = Arc::new(Mutex::new(SimWorld::new(cfg)));
        (
            SimGrayscale {
                world: world.clone(),
            },
            SimDrive { world },
        )
    }
}

/// 仿真灰度传感器句柄
pub struct SimGrayscale {
    world: Arc<Mutex<SimWorld>>,
}

impl GrayscaleAdapter for SimGrayscale {
    fn read_triple(&mut self) -> Result<(f64, f64, f64), HalError> {
        Ok(self.world.lock().read_triple())
    }
}

/// 仿真行驶执行器句柄
pub struct SimDrive {
    world: Arc<Mutex<SimWorld>>,
}

impl DriveAdapter for SimDrive {
    fn set_steering_angle(&mut self, degrees: f64) -> Result<(), HalError> {
        let mut world = self.world.lock();
        world.step();
        world.steering_deg = degrees;
        Ok(())
    }

    fn drive_forward(&mut self, power: u8) -> Result<(), HalError> {
        let mut world = self.world.lock();
        world.step();
        if world.motion != Motion::Forward(power) {
            trace!("Sim: forward at power {}", power);
        }
        world.motion = Motion::Forward(power);
        Ok(())
    }

    fn drive_backward(&mut self, power: u8) -> Result<(), HalError> {
        let mut world = self.world.lock();
        world.step();
        if world.motion != Motion::Backward(power) {
            trace!("Sim: backward at power {}", power);
        }
        world.motion = Motion::Backward(power);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), HalError> {
        let mut world = self.world.lock();
        world.step();
        world.motion = Motion::Stopped;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn quiet_config() -> SimConfig {
        SimConfig {
            noise_amplitude: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_centered_start_reads_dark_center() {
        let (mut gray, _drive) = SimVehicle::spawn(quiet_config());
        let (l, m, r) = gray.read_triple().unwrap();

        // 线正好在中间传感器下：中间是线电平，两侧基本是地板电平
        assert_eq!(m, 300.0);
        assert!(l > 850.0, "left should look like floor, got {l}");
        assert!(r > 850.0, "right should look like floor, got {r}");
    }

    #[test]
    fn test_lateral_offset_shifts_line_to_side_sensor() {
        let cfg = SimConfig {
            initial_lateral_m: 0.014,
            ..quiet_config()
        };
        let (mut gray, _drive) = SimVehicle::spawn(cfg);
        let (l, m, r) = gray.read_triple().unwrap();

        // 小车在线右侧 => 线出现在左侧传感器下
        assert_eq!(l, 300.0);
        assert!(r > l && m > l);
    }

    #[test]
    fn test_stopped_vehicle_does_not_drift() {
        let (mut gray, _drive) = SimVehicle::spawn(quiet_config());
        let first = gray.read_triple().unwrap();
        thread::sleep(Duration::from_millis(30));
        let second = gray.read_triple().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_forward_with_steer_changes_readings() {
        let (mut gray, mut drive) = SimVehicle::spawn(quiet_config());
        drive.set_steering_angle(25.0).unwrap();
        drive.drive_forward(50).unwrap();
        thread::sleep(Duration::from_millis(200));
        let (l, m, _r) = gray.read_triple().unwrap();

        // 持续转向后线不再位于中间传感器正下方
        assert!(m > 300.0, "line should have drifted off center, got {m}");
        let _ = l;
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (_gray, mut drive) = SimVehicle::spawn(quiet_config());
        drive.drive_forward(20).unwrap();
        drive.stop().unwrap();
        drive.stop().unwrap();
    }
}
