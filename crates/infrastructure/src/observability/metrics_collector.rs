//! 协调层指标收集

use std::net::SocketAddr;

use anyhow::Result;
use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{debug, info};

/// 调度、确认和节点相关的指标
pub struct MetricsCollector {
    tasks_created_total: Counter,
    tasks_dispatched_total: Counter,
    tasks_completed_total: Counter,
    tasks_failed_total: Counter,
    tasks_requeued_total: Counter,
    dispatch_push_failures_total: Counter,
    duplicate_acks_total: Counter,
    malformed_messages_total: Counter,

    online_nodes: Gauge,
    pending_tasks: Gauge,
    connected_sessions: Gauge,

    dispatch_cycle_duration: Histogram,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            tasks_created_total: counter!("fleet_tasks_created_total"),
            tasks_dispatched_total: counter!("fleet_tasks_dispatched_total"),
            tasks_completed_total: counter!("fleet_tasks_completed_total"),
            tasks_failed_total: counter!("fleet_tasks_failed_total"),
            tasks_requeued_total: counter!("fleet_tasks_requeued_total"),
            dispatch_push_failures_total: counter!("fleet_dispatch_push_failures_total"),
            duplicate_acks_total: counter!("fleet_duplicate_acks_total"),
            malformed_messages_total: counter!("fleet_malformed_messages_total"),
            online_nodes: gauge!("fleet_online_nodes"),
            pending_tasks: gauge!("fleet_pending_tasks"),
            connected_sessions: gauge!("fleet_connected_sessions"),
            dispatch_cycle_duration: histogram!("fleet_dispatch_cycle_duration_seconds"),
        }
    }

    pub fn record_task_created(&self, kind: &str) {
        self.tasks_created_total.increment(1);
        debug!(task_kind = kind, "Task created");
    }

    pub fn record_task_dispatched(&self, task_id: i64, node_id: i64) {
        self.tasks_dispatched_total.increment(1);
        debug!(task_id = task_id, node_id = node_id, "Task dispatched");
    }

    pub fn record_task_completed(&self) {
        self.tasks_completed_total.increment(1);
    }

    pub fn record_task_failed(&self) {
        self.tasks_failed_total.increment(1);
    }

    pub fn record_task_requeued(&self, reason: &str) {
        self.tasks_requeued_total.increment(1);
        debug!(reason = reason, "Task requeued");
    }

    pub fn record_push_failure(&self) {
        self.dispatch_push_failures_total.increment(1);
    }

    pub fn record_duplicate_ack(&self) {
        self.duplicate_acks_total.increment(1);
    }

    pub fn record_malformed_message(&self) {
        self.malformed_messages_total.increment(1);
    }

    pub fn update_online_nodes(&self, count: usize) {
        self.online_nodes.set(count as f64);
    }

    pub fn update_pending_tasks(&self, count: usize) {
        self.pending_tasks.set(count as f64);
    }

    pub fn update_connected_sessions(&self, count: usize) {
        self.connected_sessions.set(count as f64);
    }

    pub fn record_dispatch_cycle(&self, duration_seconds: f64) {
        self.dispatch_cycle_duration.record(duration_seconds);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// 安装 Prometheus 导出器，需要在 tokio 运行时内调用
pub fn init_metrics_exporter(bind_address: &str) -> Result<()> {
    let addr: SocketAddr = bind_address
        .parse()
        .map_err(|e| anyhow::anyhow!("指标导出地址无效 {}: {}", bind_address, e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    info!("Prometheus指标导出器已启动: {}", addr);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_without_recorder_is_noop() {
        let collector = MetricsCollector::new();
        collector.record_task_dispatched(1, 2);
        collector.record_duplicate_ack();
        collector.update_online_nodes(3);
        collector.record_dispatch_cycle(0.01);
    }

    #[test]
    fn test_invalid_exporter_address() {
        assert!(init_metrics_exporter("not-an-address").is_err());
    }
}
