//! 管线层错误类型定义
//!
//! 只有配置错误会在构造期作为失败向调用方传播；
//! 运行期的所有条件（采样间隙、丢线、恢复超时）都由状态机吸收。

use thiserror::Error;
use trackcar_hal::HalError;

/// 管线层错误类型
#[derive(Error, Debug)]
pub enum PipelineError {
    /// 无法识别的极性值（构造期配置错误）
    #[error("Unknown polarity value: {value:?} (expected \"dark\" or \"light\")")]
    UnknownPolarity { value: String },

    /// 非法配置参数
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// 硬件抽象层错误
    #[error("HAL error: {0}")]
    Hal(#[from] HalError),
}
