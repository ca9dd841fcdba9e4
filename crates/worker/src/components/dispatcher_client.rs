use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use fleet_core::{DestinationConfig, FleetError, FleetResult};
use fleet_domain::entities::{Account, AgentVersion};
use fleet_domain::messaging::{CompletionAck, CompletionReport};

/// 节点对协调服务的请求/响应调用
#[async_trait]
pub trait CoordinatorApi: Send + Sync {
    /// 完成确认通道，服务端对重复报告幂等
    async fn report_completion(
        &self,
        task_id: i64,
        report: &CompletionReport,
    ) -> FleetResult<CompletionAck>;

    /// 节点绑定的账号，未绑定时为 None
    async fn get_assigned_account(&self, node_id: i64) -> FleetResult<Option<Account>>;

    /// 服务端当前发布的版本，尚未发布时为 None
    async fn get_current_version(&self) -> FleetResult<Option<AgentVersion>>;

    async fn download_payload(&self) -> FleetResult<Vec<u8>>;

    async fn resolve_destination(&self, name: &str) -> FleetResult<Option<DestinationConfig>>;
}

/// 服务端统一响应外壳，只关心 data 字段
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

/// 基于 HTTP 的协调服务客户端
pub struct DispatcherClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl DispatcherClient {
    pub fn new(server_url: &str, request_timeout: Duration) -> FleetResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| FleetError::Configuration(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self {
            base_url: server_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// 解析响应，404 映射为 None，其余非 2xx 视为错误
    async fn parse_optional<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> FleetResult<Option<T>> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }

        // 响应体读取或解析失败多半是连接中断或中间代理的页面，按瞬时错误处理
        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| FleetError::Network(format!("解析响应失败: {e}")))?;
        Ok(envelope.data)
    }
}

fn network_error(e: reqwest::Error) -> FleetError {
    FleetError::Network(e.to_string())
}

/// 5xx、408 和 429 按瞬时错误处理，其余 4xx 说明请求本身有问题，重试没有意义
fn status_error(status: StatusCode, body: String) -> FleetError {
    let transient = status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS;
    if transient {
        FleetError::Network(format!("HTTP {status} - {body}"))
    } else {
        FleetError::Internal(format!("HTTP {status} - {body}"))
    }
}

#[async_trait]
impl CoordinatorApi for DispatcherClient {
    async fn report_completion(
        &self,
        task_id: i64,
        report: &CompletionReport,
    ) -> FleetResult<CompletionAck> {
        let url = self.url(&format!("/api/tasks/{task_id}/completion"));
        let response = self
            .http_client
            .post(&url)
            .json(report)
            .send()
            .await
            .map_err(network_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(FleetError::TaskNotFound { id: task_id });
        }

        let ack: Option<CompletionAck> = Self::parse_optional(response).await?;
        let ack = ack.ok_or_else(|| FleetError::Network("完成确认响应缺少数据".to_string()))?;
        debug!(
            "任务 {} 完成确认: accepted={}, duplicate={}, status={}",
            task_id, ack.accepted, ack.duplicate, ack.status
        );
        Ok(ack)
    }

    async fn get_assigned_account(&self, node_id: i64) -> FleetResult<Option<Account>> {
        let url = self.url(&format!("/api/nodes/{node_id}/account"));
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(network_error)?;
        Self::parse_optional(response).await
    }

    async fn get_current_version(&self) -> FleetResult<Option<AgentVersion>> {
        let url = self.url("/api/agent/version");
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(network_error)?;
        Self::parse_optional(response).await
    }

    async fn download_payload(&self) -> FleetResult<Vec<u8>> {
        let url = self.url("/api/agent/payload");
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("下载安装包失败: HTTP {}", status);
            return Err(status_error(status, body));
        }

        let bytes = response.bytes().await.map_err(network_error)?;
        Ok(bytes.to_vec())
    }

    async fn resolve_destination(&self, name: &str) -> FleetResult<Option<DestinationConfig>> {
        let url = self.url(&format!("/api/destinations/{name}"));
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(network_error)?;
        Self::parse_optional(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trimmed() {
        let client = DispatcherClient::new("http://127.0.0.1:8080/", Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:8080");
        assert_eq!(
            client.url("/api/agent/version"),
            "http://127.0.0.1:8080/api/agent/version"
        );
    }

    #[test]
    fn test_status_error_classification() {
        assert!(status_error(StatusCode::BAD_GATEWAY, String::new()).is_transient());
        assert!(status_error(StatusCode::REQUEST_TIMEOUT, String::new()).is_transient());
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, String::new()).is_transient());
        assert!(!status_error(StatusCode::BAD_REQUEST, String::new()).is_transient());
        assert!(!status_error(StatusCode::CONFLICT, String::new()).is_transient());
    }

    #[test]
    fn test_envelope_with_null_data() {
        let envelope: Envelope<Account> =
            serde_json::from_str(r#"{"success":true,"data":null,"message":null}"#).unwrap();
        assert!(envelope.data.is_none());
    }
}
