//! # Fleet Worker
//!
//! 节点侧代理：维持会话通道、执行派发的任务、可靠上报结果并在启动时自更新。

pub mod components;
pub mod executors;
pub mod service;
pub mod updater;

pub use components::{
    AgentState, CompletionReporter, CoordinatorApi, DispatcherClient, PendingCompletion,
    PendingCompletionQueue, ReportResult,
};
pub use executors::{ExecutionContext, ExternalCommandExecutor, TaskExecutor};
pub use service::{AgentExit, WorkerService, WorkerServiceBuilder};
pub use updater::{ExecRelauncher, ProcessRelauncher, UpdateOutcome, Updater};
