use std::sync::Arc;

use tracing::{debug, info};

use fleet_core::FleetResult;
use fleet_domain::messaging::{CompletionAck, CompletionReport};
use fleet_infrastructure::MetricsCollector;

use crate::state_machine::TaskStateMachine;

/// 完成确认通道的服务端
///
/// 终态迁移的唯一入口。重复回报返回 `duplicate = true`，不视为错误。
pub struct CompletionService {
    state: Arc<TaskStateMachine>,
    metrics: Arc<MetricsCollector>,
}

impl CompletionService {
    pub fn new(state: Arc<TaskStateMachine>, metrics: Arc<MetricsCollector>) -> Self {
        Self { state, metrics }
    }

    pub async fn report_completion(
        &self,
        task_id: i64,
        report: &CompletionReport,
    ) -> FleetResult<CompletionAck> {
        debug!(
            "收到节点 {} 对任务 {} 的完成回报 (成功: {})",
            report.node_id,
            task_id,
            report.outcome.is_success()
        );

        let ack = self.state.apply_completion(task_id, report).await?;

        if ack.duplicate {
            self.metrics.record_duplicate_ack();
            info!(
                "任务 {} 的完成回报为重复或过期回报，当前状态: {}",
                task_id, ack.status
            );
        }
        Ok(ack)
    }
}
