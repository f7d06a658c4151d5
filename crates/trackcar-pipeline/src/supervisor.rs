//! 管线监督者
//!
//! [`Pipeline`] 持有两个邮箱、三个任务线程和共享运行标志，
//! 负责启动和失效安全的关停：清除运行标志、带超时地等待
//! 三个线程退出，最后无条件下发"回正 + 停车"。该收尾序列
//! 在任何退出路径上都会执行，包括 `Drop`。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, spawn};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{error, info, warn};
use trackcar_hal::{DriveAdapter, GrayscaleAdapter};

use crate::config::PipelineConfig;
use crate::controller::controller_loop;
use crate::interpreter::{Interpreter, interpreter_loop};
use crate::mailbox::Mailbox;
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::sample::{OffsetSample, RawSample};
use crate::sensor::sensor_loop;

/// Extension trait for timeout-capable thread joins
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        use std::sync::mpsc;

        let (tx, rx) = mpsc::channel();

        // 看门狗线程负责真正的 join，主线程带超时等结果
        spawn(move || {
            let result = self.join();
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Thread join timeout",
            ))),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "Thread panicked during join",
            ))),
        }
    }
}

type SharedSensor = Arc<Mutex<dyn GrayscaleAdapter + Send>>;
type SharedDrive = Arc<Mutex<dyn DriveAdapter + Send>>;

/// 三任务巡线管线
///
/// 通过 [`PipelineBuilder`](crate::PipelineBuilder) 构造。存活期间
/// 三个任务在各自线程上按固定周期运行；[`Pipeline::shutdown`]（或
/// `Drop`）执行失效安全的收尾。
pub struct Pipeline {
    is_running: Arc<AtomicBool>,
    raw_bus: Arc<Mailbox<RawSample>>,
    offset_bus: Arc<Mailbox<OffsetSample>>,
    metrics: Arc<PipelineMetrics>,
    drive: SharedDrive,

    sensor_thread: Option<JoinHandle<()>>,
    interpreter_thread: Option<JoinHandle<()>>,
    controller_thread: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// 启动三个任务线程（仅供 builder 调用；配置已校验）
    pub(crate) fn spawn(sensor: SharedSensor, drive: SharedDrive, config: PipelineConfig) -> Self {
        let is_running = Arc::new(AtomicBool::new(true));
        let raw_bus: Arc<Mailbox<RawSample>> = Arc::new(Mailbox::new());
        let offset_bus: Arc<Mailbox<OffsetSample>> = Arc::new(Mailbox::new());
        let metrics = Arc::new(PipelineMetrics::new());

        let sensor_thread = {
            let sensor = sensor.clone();
            let raw_bus = raw_bus.clone();
            let period = config.sensor_period();
            let is_running = is_running.clone();
            let metrics = metrics.clone();
            spawn(move || sensor_loop(sensor, raw_bus, period, is_running, metrics))
        };

        let interpreter_thread = {
            let interpreter = Interpreter::new(config.interpreter.clone());
            let raw_bus = raw_bus.clone();
            let offset_bus = offset_bus.clone();
            let period = config.interpreter_period();
            let is_running = is_running.clone();
            let metrics = metrics.clone();
            spawn(move || {
                interpreter_loop(interpreter, raw_bus, offset_bus, period, is_running, metrics)
            })
        };

        let controller_thread = {
            let sensor = sensor.clone();
            let drive = drive.clone();
            let offset_bus = offset_bus.clone();
            let config = config.clone();
            let is_running = is_running.clone();
            let metrics = metrics.clone();
            spawn(move || controller_loop(sensor, drive, offset_bus, config, is_running, metrics))
        };

        info!("Pipeline started: sensor/interpreter/controller threads running");

        Self {
            is_running,
            raw_bus,
            offset_bus,
            metrics,
            drive,
            sensor_thread: Some(sensor_thread),
            interpreter_thread: Some(interpreter_thread),
            controller_thread: Some(controller_thread),
        }
    }

    /// 管线是否仍在运行（任一任务遇到致命硬件错误也会清除该标志）
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// 最新的原始采样（诊断用）
    pub fn latest_raw(&self) -> Option<RawSample> {
        self.raw_bus.read()
    }

    /// 最新的偏移采样（诊断用）
    pub fn latest_offset(&self) -> Option<OffsetSample> {
        self.offset_bus.read()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// 失效安全关停：清除运行标志、等待三个线程退出、
    /// 下发回正 + 停车。幂等，可重复调用。
    pub fn shutdown(&mut self) {
        // Release: All writes before this are visible to threads that see the false value
        self.is_running.store(false, Ordering::Release);

        let join_timeout = Duration::from_secs(2);

        if let Some(handle) = self.sensor_thread.take()
            && let Err(_e) = handle.join_timeout(join_timeout)
        {
            error!(
                "Sensor thread panicked or failed to shut down within {:?}",
                join_timeout
            );
        }

        if let Some(handle) = self.interpreter_thread.take()
            && let Err(_e) = handle.join_timeout(join_timeout)
        {
            error!(
                "Interpreter thread panicked or failed to shut down within {:?}",
                join_timeout
            );
        }

        if let Some(handle) = self.controller_thread.take()
            && let Err(_e) = handle.join_timeout(join_timeout)
        {
            error!(
                "Controller thread panicked or failed to shut down within {:?}",
                join_timeout
            );
        }

        // 执行器归中性位。stop 幂等，重复关停不会改变终态
        let mut drive = self.drive.lock();
        if let Err(e) = drive.set_steering_angle(0.0) {
            warn!("Shutdown: failed to center steering: {}", e);
        }
        if let Err(e) = drive.stop() {
            warn!("Shutdown: failed to stop drive: {}", e);
        }

        info!("Pipeline shut down, actuators neutral");
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
