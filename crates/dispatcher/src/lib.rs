//! 协调服务
//!
//! 任务状态机、节点心跳监控、会话注册表、派发循环，
//! 以及完成确认、账号绑定、版本发布和投放目标查询服务。

pub mod account_service;
pub mod completion_service;
pub mod destination_service;
pub mod heartbeat_monitor;
pub mod scheduler;
pub mod session_hub;
pub mod session_service;
pub mod state_machine;
pub mod strategies;
pub mod version_service;

pub use account_service::AccountService;
pub use completion_service::CompletionService;
pub use destination_service::DestinationService;
pub use heartbeat_monitor::HeartbeatMonitor;
pub use scheduler::{Dispatch, TaskDispatcher};
pub use session_hub::{SessionHub, SessionPusher, SessionRegistration};
pub use session_service::SessionService;
pub use state_machine::TaskStateMachine;
pub use strategies::*;
pub use version_service::VersionService;
