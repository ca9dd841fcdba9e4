use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info};

use fleet_domain::entities::NodeMetrics;
use fleet_domain::messaging::NodeMessage;

use super::agent_state::AgentState;

pub struct HeartbeatManager {
    state: Arc<AgentState>,
    heartbeat_interval: Duration,
    hostname: Option<String>,
}

impl HeartbeatManager {
    pub fn new(state: Arc<AgentState>, heartbeat_interval: Duration) -> Self {
        let hostname = hostname::get()
            .ok()
            .map(|h| h.to_string_lossy().into_owned());
        Self {
            state,
            heartbeat_interval,
            hostname,
        }
    }

    pub async fn collect_metrics(&self) -> NodeMetrics {
        let (cpu_usage, memory_usage) = read_system_load();
        NodeMetrics {
            cpu_usage,
            memory_usage,
            hostname: self.hostname.clone(),
            agent_version: Some(self.state.agent_version().to_string()),
            uptime_seconds: self.state.uptime_seconds(),
            tasks_executed: self.state.tasks_executed(),
            pending_completions: self.state.pending().len().await as u32,
        }
    }

    /// 按固定间隔向会话出站队列写入心跳，会话关闭后退出
    pub async fn run(&self, outbound: mpsc::Sender<NodeMessage>) {
        let mut ticker = interval(self.heartbeat_interval);
        loop {
            ticker.tick().await;
            let metrics = self.collect_metrics().await;
            if outbound
                .send(NodeMessage::Heartbeat { metrics })
                .await
                .is_err()
            {
                info!("会话已关闭，停止发送心跳");
                break;
            }
            debug!("节点 {} 发送心跳", self.state.node_id());
        }
    }
}

/// 1分钟负载和内存使用率，只在 Linux 上可用，其余平台为 0
fn read_system_load() -> (f64, f64) {
    let load = std::fs::read_to_string("/proc/loadavg")
        .ok()
        .and_then(|s| s.split_whitespace().next().and_then(|v| v.parse().ok()))
        .unwrap_or(0.0);

    let memory = std::fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|s| {
            let field = |name: &str| {
                s.lines()
                    .find(|l| l.starts_with(name))
                    .and_then(|l| l.split_whitespace().nth(1))
                    .and_then(|v| v.parse::<f64>().ok())
            };
            let total = field("MemTotal:")?;
            let available = field("MemAvailable:")?;
            (total > 0.0).then(|| (total - available) / total * 100.0)
        })
        .unwrap_or(0.0);

    (load, memory)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_reflect_agent_state() {
        let state = Arc::new(AgentState::new(3, "1.2.0"));
        state.record_executed();
        state.record_executed();

        let manager = HeartbeatManager::new(state, Duration::from_secs(10));
        let metrics = manager.collect_metrics().await;
        assert_eq!(metrics.agent_version.as_deref(), Some("1.2.0"));
        assert_eq!(metrics.tasks_executed, 2);
        assert_eq!(metrics.pending_completions, 0);
        assert!(metrics.memory_usage >= 0.0);
    }

    #[tokio::test]
    async fn test_run_stops_when_session_closed() {
        let state = Arc::new(AgentState::new(3, "1.0.0"));
        let manager = HeartbeatManager::new(state, Duration::from_millis(10));
        let (tx, mut rx) = mpsc::channel(4);

        let handle = tokio::spawn(async move { manager.run(tx).await });
        assert!(matches!(
            rx.recv().await,
            Some(NodeMessage::Heartbeat { .. })
        ));
        drop(rx);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
