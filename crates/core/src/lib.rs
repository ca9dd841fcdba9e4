//! # Fleet Core
//!
//! 协调层的公共基础设施：统一错误类型、配置模型，
//! 以及确认通道与会话重连共用的重试策略和可注入时钟。

pub mod config;
pub mod errors;
pub mod retry;

pub use config::*;
pub use errors::*;
pub use retry::{Clock, ManualClock, RetryExhausted, RetryPolicy, SystemClock};
