//! # Fleet API
//!
//! 协调服务的 HTTP 与 WebSocket 接口：
//! - `GET /ws/nodes/{node_id}` 会话通道，推送任务并接收心跳
//! - `POST /api/tasks/{id}/completion` 完成确认通道
//! - 账号、版本、投放目标查询，以及供运营使用的任务和节点管理接口

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use axum::Router;

pub use error::{ApiError, ApiResult};
pub use routes::AppState;

/// 创建带中间件的应用路由
pub fn create_app(state: AppState) -> Router {
    routes::create_routes(state)
        .layer(middleware::trace_layer())
        .layer(middleware::cors_layer())
        .layer(axum::middleware::from_fn(middleware::request_logging))
}
