//! 配置管理
//!
//! 加载顺序：
//! 1. 内置默认值
//! 2. TOML 配置文件
//! 3. 环境变量覆盖（前缀 `FLEET`，层级分隔符 `__`，例如 `FLEET_DISPATCHER__MAX_RETRIES=5`）

pub mod models;

pub use models::*;
