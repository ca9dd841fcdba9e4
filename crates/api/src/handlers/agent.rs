use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use tracing::{error, info};

use crate::{
    error::{ApiError, ApiResult},
    response::{created, optional},
    routes::AppState,
};

/// 版本发布请求，`payload_ref` 是安装包目录下的文件名
#[derive(Debug, Deserialize)]
pub struct PublishVersionRequest {
    pub version: String,
    #[serde(default)]
    pub changelog: String,
    pub payload_ref: String,
}

pub async fn get_current_version(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(optional(state.versions.current_version().await?))
}

pub async fn publish_version(
    State(state): State<AppState>,
    Json(request): Json<PublishVersionRequest>,
) -> ApiResult<impl IntoResponse> {
    let path = state.versions.payload_path(&request.payload_ref)?;
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Err(ApiError::BadRequest(format!(
            "安装包不存在: {}",
            request.payload_ref
        )));
    }

    let version = state
        .versions
        .publish(&request.version, request.changelog, request.payload_ref)
        .await?;
    Ok(created(version))
}

/// 下载当前版本的安装包
pub async fn download_payload(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let path = state
        .versions
        .current_payload_path()
        .await?
        .ok_or_else(|| ApiError::NotFound("尚未发布任何版本".to_string()))?;

    let bytes = tokio::fs::read(&path).await.map_err(|e| {
        error!("读取安装包 {} 失败: {}", path.display(), e);
        ApiError::NotFound(format!("安装包不可用: {}", path.display()))
    })?;

    info!("下发安装包 {} ({} 字节)", path.display(), bytes.len());
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        bytes,
    ))
}
