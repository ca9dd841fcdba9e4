use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fleet_core::FleetError;
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("协调服务错误: {0}")]
    Fleet(#[from] FleetError),

    #[error("未找到资源: {0}")]
    NotFound(String),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("内部服务器错误: {0}")]
    Internal(String),
}

impl ApiError {
    fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Fleet(err) => match err {
                FleetError::TaskNotFound { .. } => (StatusCode::NOT_FOUND, "TASK_NOT_FOUND"),
                FleetError::NodeNotFound { .. } => (StatusCode::NOT_FOUND, "NODE_NOT_FOUND"),
                FleetError::AccountNotFound { .. } => {
                    (StatusCode::NOT_FOUND, "ACCOUNT_NOT_FOUND")
                }
                FleetError::InvalidTaskParams(_) => {
                    (StatusCode::BAD_REQUEST, "INVALID_TASK_PARAMS")
                }
                FleetError::InvalidVersion(_) => (StatusCode::BAD_REQUEST, "INVALID_VERSION"),
                FleetError::DependencyNotSatisfied { .. } => {
                    (StatusCode::BAD_REQUEST, "DEPENDENCY_NOT_SATISFIED")
                }
                FleetError::Serialization(_) => (StatusCode::BAD_REQUEST, "SERIALIZATION_ERROR"),
                FleetError::InvalidTransition { .. } => {
                    (StatusCode::CONFLICT, "INVALID_TRANSITION")
                }
                FleetError::AccountConflict(_) => (StatusCode::CONFLICT, "ACCOUNT_CONFLICT"),
                FleetError::NodeUnavailable { .. } | FleetError::SessionUnavailable { .. } => {
                    (StatusCode::SERVICE_UNAVAILABLE, "NODE_UNAVAILABLE")
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.classify();

        // 内部错误不向调用方暴露细节
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("请求处理失败: {}", self);
            "系统内部错误".to_string()
        } else {
            match &self {
                ApiError::Fleet(err) => err.to_string(),
                other => other.to_string(),
            }
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": error_type,
                "code": status.as_u16(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fleet_error_conversion() {
        let api_error: ApiError = FleetError::TaskNotFound { id: 123 }.into();
        match api_error {
            ApiError::Fleet(FleetError::TaskNotFound { id }) => assert_eq!(id, 123),
            _ => panic!("Expected FleetError::TaskNotFound"),
        }
    }

    #[test]
    fn test_status_mapping() {
        let cases = vec![
            (FleetError::TaskNotFound { id: 1 }, StatusCode::NOT_FOUND),
            (FleetError::AccountNotFound { id: 1 }, StatusCode::NOT_FOUND),
            (
                FleetError::InvalidTaskParams("缺少内容".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                FleetError::InvalidVersion("1.x".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                FleetError::AccountConflict("已绑定".to_string()),
                StatusCode::CONFLICT,
            ),
            (
                FleetError::DatabaseOperation("磁盘已满".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            let response = ApiError::from(error).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn test_local_variants() {
        assert_eq!(
            ApiError::NotFound("目标".to_string()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::BadRequest("参数".to_string()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }
}
