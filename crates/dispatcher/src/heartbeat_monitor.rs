use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use fleet_core::{DispatcherConfig, FleetResult};
use fleet_domain::{
    entities::{NodeMetrics, NodeStatus, WorkerNode},
    repositories::NodeRepository,
};
use fleet_infrastructure::MetricsCollector;

use crate::state_machine::TaskStateMachine;

/// 节点注册表与心跳监控
pub struct HeartbeatMonitor {
    state: Arc<TaskStateMachine>,
    nodes: Arc<dyn NodeRepository>,
    metrics: Arc<MetricsCollector>,
    config: DispatcherConfig,
}

impl HeartbeatMonitor {
    pub fn new(
        state: Arc<TaskStateMachine>,
        nodes: Arc<dyn NodeRepository>,
        metrics: Arc<MetricsCollector>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            state,
            nodes,
            metrics,
            config,
        }
    }

    /// 幂等地记录心跳
    pub async fn record_heartbeat(
        &self,
        node_id: i64,
        metrics: NodeMetrics,
    ) -> FleetResult<WorkerNode> {
        self.state
            .record_heartbeat(node_id, Some(metrics), None, Utc::now())
            .await
    }

    /// 一次离线扫描，返回本次被判定离线的节点
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> FleetResult<Vec<i64>> {
        let offline = self
            .state
            .sweep_offline(now, self.config.offline_threshold())
            .await?;

        if !offline.is_empty() {
            info!("检测到 {} 个离线节点: {:?}", offline.len(), offline);
        }

        let online = self
            .nodes
            .find_all()
            .await?
            .iter()
            .filter(|n| n.status != NodeStatus::Offline)
            .count();
        self.metrics.update_online_nodes(online);

        Ok(offline)
    }

    pub async fn list_nodes(&self) -> FleetResult<Vec<WorkerNode>> {
        self.nodes.find_all().await
    }

    /// 离线扫描循环，直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "启动节点心跳监控，离线阈值: {:?}",
            self.config.offline_threshold()
        );

        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
            self.config.sweep_interval_seconds,
        ));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    debug!("开始离线节点扫描");
                    if let Err(e) = self.sweep_once(Utc::now()).await {
                        error!("离线节点扫描失败: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("收到关闭信号，停止节点心跳监控");
                    break;
                }
            }
        }
    }
}
