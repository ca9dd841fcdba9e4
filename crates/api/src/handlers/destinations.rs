use axum::{
    extract::{Path, State},
    response::IntoResponse,
};

use crate::{
    error::{ApiError, ApiResult},
    response::success,
    routes::AppState,
};

pub async fn get_destination(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let destination = state
        .destinations
        .resolve(&name)
        .cloned()
        .ok_or_else(|| ApiError::NotFound(format!("投放目标: {name}")))?;
    Ok(success(destination))
}
