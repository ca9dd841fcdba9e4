use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl<T> ApiResponse<T>
where
    T: Serialize,
{
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn success_with_message(data: T, message: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message),
            timestamp: chrono::Utc::now(),
        }
    }
}

impl<T> IntoResponse for ApiResponse<T>
where
    T: Serialize,
{
    fn into_response(self) -> axum::response::Response {
        Json(self).into_response()
    }
}

/// 数据可能为空的查询，空结果以 `data: null` 返回而不是 404
pub fn optional<T: Serialize>(data: Option<T>) -> impl IntoResponse {
    let message = data.is_none().then(|| "未找到".to_string());
    (
        StatusCode::OK,
        ApiResponse {
            success: true,
            data,
            message,
            timestamp: chrono::Utc::now(),
        },
    )
}

pub fn success<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::OK, ApiResponse::success(data))
}

pub fn created<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::CREATED, ApiResponse::success(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_response_serialization() {
        let response = ApiResponse::success("test_data");
        let json = serde_json::to_string(&response).unwrap();

        assert!(json.contains("\"success\":true"));
        assert!(json.contains("\"data\":\"test_data\""));
        assert!(json.contains("\"timestamp\""));
    }

    #[test]
    fn test_api_response_deserialization() {
        let json_str = r#"{
            "success": true,
            "data": null,
            "message": "未找到",
            "timestamp": "2024-01-01T00:00:00Z"
        }"#;

        let response: ApiResponse<String> = serde_json::from_str(json_str).unwrap();
        assert!(response.success);
        assert!(response.data.is_none());
        assert_eq!(response.message.as_deref(), Some("未找到"));
    }

    #[test]
    fn test_created_status() {
        let response = created("x").into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
    }
}
