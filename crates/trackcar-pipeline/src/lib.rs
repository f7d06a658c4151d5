//! # TrackCar 管线层
//!
//! 三任务并发巡线管线：
//!
//! ```text
//! 采样任务    -> raw_bus    （最新三路灰度原始值）
//! 解释任务    -> offset_bus （横向偏移 [-1,1]，丢线时为 None）
//! 控制任务    -> 转向 + 行驶指令（含丢线恢复机动）
//! ```
//!
//! 三个任务各自按固定周期独立调度，任务间只通过单槽邮箱
//! （最新值覆盖写）传递消息，互不阻塞。监督者 [`Pipeline`]
//! 负责启动、取消和退出时的强制停车。

mod builder;
pub mod config;
mod controller;
mod error;
pub mod interpreter;
mod mailbox;
pub mod metrics;
mod sample;
pub mod sensor;
mod supervisor;

pub use builder::PipelineBuilder;
pub use config::{ControllerConfig, InterpreterConfig, PipelineConfig, Polarity, RecoveryConfig};
pub use controller::{
    PdController, PdGains, RecoveryOutcome, RecoveryState, TurnDirection, controller_loop,
    line_seen, run_recovery,
};
pub use error::PipelineError;
pub use interpreter::{Interpreter, interpreter_loop};
pub use mailbox::Mailbox;
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use sample::{OffsetSample, RawSample};
pub use sensor::sensor_loop;
pub use supervisor::Pipeline;
