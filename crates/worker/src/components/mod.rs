pub mod agent_state;
pub mod completion_reporter;
pub mod dispatcher_client;
pub mod heartbeat_manager;
pub mod session_client;
pub mod task_execution;

pub use agent_state::AgentState;
pub use completion_reporter::{
    CompletionReporter, FlushSummary, PendingCompletion, PendingCompletionQueue, ReportResult,
};
pub use dispatcher_client::{CoordinatorApi, DispatcherClient};
pub use heartbeat_manager::HeartbeatManager;
pub use task_execution::TaskExecutionManager;
