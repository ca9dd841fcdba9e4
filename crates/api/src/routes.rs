use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use fleet_dispatcher::{
    AccountService, CompletionService, DestinationService, HeartbeatMonitor, SessionService,
    TaskStateMachine, VersionService,
};
use fleet_domain::repositories::TaskRepository;

use crate::handlers::{
    accounts::{assign_account, create_account, list_accounts, unassign_account},
    agent::{download_payload, get_current_version, publish_version},
    destinations::get_destination,
    health::health_check,
    nodes::{get_node_account, list_nodes},
    sessions::node_session,
    tasks::{create_task, get_task, list_tasks, report_completion},
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub state_machine: Arc<TaskStateMachine>,
    pub tasks: Arc<dyn TaskRepository>,
    pub monitor: Arc<HeartbeatMonitor>,
    pub completions: Arc<CompletionService>,
    pub sessions: Arc<SessionService>,
    pub accounts: Arc<AccountService>,
    pub versions: Arc<VersionService>,
    pub destinations: Arc<DestinationService>,
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        // 健康检查
        .route("/health", get(health_check))
        // 会话通道
        .route("/ws/nodes/{node_id}", get(node_session))
        // 任务
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route("/api/tasks/{id}", get(get_task))
        .route("/api/tasks/{id}/completion", post(report_completion))
        // 节点
        .route("/api/nodes", get(list_nodes))
        .route("/api/nodes/{id}/account", get(get_node_account))
        // 账号
        .route("/api/accounts", get(list_accounts).post(create_account))
        .route("/api/accounts/{id}/assign", post(assign_account))
        .route("/api/accounts/{id}/unassign", post(unassign_account))
        // 节点程序版本
        .route(
            "/api/agent/version",
            get(get_current_version).post(publish_version),
        )
        .route("/api/agent/payload", get(download_payload))
        // 投放目标
        .route("/api/destinations/{name}", get(get_destination))
        .with_state(state)
}
