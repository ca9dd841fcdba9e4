use axum::{
    extract::{Path, State},
    response::IntoResponse,
};

use crate::{
    error::ApiResult,
    response::{optional, success},
    routes::AppState,
};

/// 节点列表
pub async fn list_nodes(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let nodes = state.monitor.list_nodes().await?;
    Ok(success(nodes))
}

/// 节点当前绑定的账号，未绑定时 data 为 null
pub async fn get_node_account(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let account = state.accounts.get_assigned_account(id).await?;
    Ok(optional(account))
}
