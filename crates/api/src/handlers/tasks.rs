use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use fleet_domain::entities::{NewTask, TaskFilter, TaskKind, TaskPayload, TaskStatus};
use fleet_domain::messaging::CompletionReport;

use crate::{
    error::{ApiError, ApiResult},
    response::{created, success},
    routes::AppState,
};

/// 任务创建请求，负载字段按 `kind` 展开在顶层
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    #[serde(flatten)]
    pub payload: TaskPayload,
    #[serde(default)]
    pub priority: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub account_affinity: Option<i64>,
    pub node_affinity: Option<i64>,
}

impl From<CreateTaskRequest> for NewTask {
    fn from(request: CreateTaskRequest) -> Self {
        NewTask {
            payload: request.payload,
            priority: request.priority,
            scheduled_at: request.scheduled_at,
            account_affinity: request.account_affinity,
            node_affinity: request.node_affinity,
        }
    }
}

/// 任务查询参数
#[derive(Debug, Deserialize)]
pub struct TaskQueryParams {
    pub status: Option<String>,
    pub kind: Option<String>,
    pub node: Option<i64>,
    pub limit: Option<usize>,
}

impl TaskQueryParams {
    fn into_filter(self) -> ApiResult<TaskFilter> {
        let status = self
            .status
            .map(|s| s.parse::<TaskStatus>())
            .transpose()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        let kind = self
            .kind
            .map(|k| k.parse::<TaskKind>())
            .transpose()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;

        Ok(TaskFilter {
            status,
            kind,
            assigned_node: self.node,
            limit: self.limit,
        })
    }
}

/// 创建任务
pub async fn create_task(
    State(state): State<AppState>,
    Json(request): Json<CreateTaskRequest>,
) -> ApiResult<impl IntoResponse> {
    let task = state.state_machine.create_task(request.into()).await?;
    info!(task_id = task.id, "通过接口创建任务: {}", task.kind().as_str());
    Ok(created(task))
}

/// 获取任务列表
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<TaskQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let filter = params.into_filter()?;
    let tasks = state.tasks.list(&filter).await?;
    Ok(success(tasks))
}

/// 获取单个任务
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let task = state.state_machine.get_task(id).await?;
    Ok(success(task))
}

/// 节点上报任务结果，重复上报返回 `duplicate=true` 而不是错误
pub async fn report_completion(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(report): Json<CompletionReport>,
) -> ApiResult<impl IntoResponse> {
    let ack = state.completions.report_completion(id, &report).await?;
    Ok(success(ack))
}
