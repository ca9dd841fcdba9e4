use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use fleet_core::FleetResult;
use fleet_domain::messaging::NodeMessage;
use fleet_infrastructure::MetricsCollector;

use crate::session_hub::{SessionHub, SessionRegistration};
use crate::state_machine::TaskStateMachine;

/// 会话通道的服务端处理：连接登记、入站消息和重连宽限
pub struct SessionService {
    hub: Arc<SessionHub>,
    state: Arc<TaskStateMachine>,
    metrics: Arc<MetricsCollector>,
    reconnect_grace: Duration,
}

impl SessionService {
    pub fn new(
        hub: Arc<SessionHub>,
        state: Arc<TaskStateMachine>,
        metrics: Arc<MetricsCollector>,
        reconnect_grace: Duration,
    ) -> Self {
        Self {
            hub,
            state,
            metrics,
            reconnect_grace,
        }
    }

    pub fn hub(&self) -> &Arc<SessionHub> {
        &self.hub
    }

    /// 节点建立会话即视为重新宣告自己
    ///
    /// 宽限期过后，本次连接之前派发且仍停留在 dispatched 的任务被重新入队。
    pub async fn on_connect(
        &self,
        node_id: i64,
        address: Option<&str>,
    ) -> FleetResult<SessionRegistration> {
        self.state
            .record_heartbeat(node_id, None, address, Utc::now())
            .await?;

        let registration = self.hub.register(node_id).await;
        self.metrics
            .update_connected_sessions(self.hub.connected_nodes().await.len());

        let state = Arc::clone(&self.state);
        let grace = self.reconnect_grace;
        let connected_at = registration.connected_at;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            match state.requeue_stale_dispatched(node_id, connected_at).await {
                Ok(requeued) if !requeued.is_empty() => {
                    info!("节点 {} 重连宽限期结束，重新入队任务: {:?}", node_id, requeued);
                }
                Ok(_) => {}
                Err(e) => error!("回收节点 {} 的滞留任务失败: {}", node_id, e),
            }
        });

        Ok(registration)
    }

    pub async fn on_disconnect(&self, node_id: i64, generation: Uuid) {
        self.hub.unregister(node_id, generation).await;
        self.metrics
            .update_connected_sessions(self.hub.connected_nodes().await.len());
    }

    /// 处理一条文本帧，格式错误的消息记录后丢弃，会话保持打开
    pub async fn handle_text(&self, node_id: i64, text: &str) {
        match serde_json::from_str::<NodeMessage>(text) {
            Ok(message) => {
                if let Err(e) = self.handle_message(node_id, message).await {
                    warn!("处理节点 {} 的会话消息失败: {}", node_id, e);
                }
            }
            Err(e) => {
                self.metrics.record_malformed_message();
                warn!("丢弃节点 {} 发送的格式错误消息: {}", node_id, e);
            }
        }
    }

    pub async fn handle_message(&self, node_id: i64, message: NodeMessage) -> FleetResult<()> {
        debug!("收到节点 {} 的会话消息: {}", node_id, message.message_type());

        match message {
            NodeMessage::Heartbeat { metrics } => {
                self.state
                    .record_heartbeat(node_id, Some(metrics), None, Utc::now())
                    .await?;
            }
            NodeMessage::TaskStarted { id } => {
                self.state.mark_started(id, node_id).await?;
            }
            // 会话上的结果事件仅作参考，终态迁移只走完成确认通道
            NodeMessage::TaskCompleted { id, result } => {
                info!("节点 {} 通知任务 {} 已完成 (结果: {:?})", node_id, id, result);
            }
            NodeMessage::TaskFailed { id, error } => {
                info!("节点 {} 通知任务 {} 执行失败: {}", node_id, id, error);
            }
        }
        Ok(())
    }
}
