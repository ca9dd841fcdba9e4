use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use crate::{
    error::{ApiError, ApiResult},
    response::{created, success},
    routes::AppState,
};

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub name: String,
    #[serde(default)]
    pub credentials: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct AssignAccountRequest {
    pub node_id: i64,
}

pub async fn create_account(
    State(state): State<AppState>,
    Json(request): Json<CreateAccountRequest>,
) -> ApiResult<impl IntoResponse> {
    if request.name.trim().is_empty() {
        return Err(ApiError::BadRequest("账号名称不能为空".to_string()));
    }
    let account = state
        .accounts
        .create_account(request.name, request.credentials)
        .await?;
    Ok(created(account))
}

pub async fn list_accounts(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(success(state.accounts.list_accounts().await?))
}

/// 把账号绑定到节点，一个节点同时只能绑定一个账号
pub async fn assign_account(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<AssignAccountRequest>,
) -> ApiResult<impl IntoResponse> {
    let account = state.accounts.assign(id, request.node_id).await?;
    Ok(success(account))
}

pub async fn unassign_account(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let account = state.accounts.unassign(id).await?;
    Ok(success(account))
}
