use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use fleet_core::{FleetResult, NodeSelection};
use fleet_domain::entities::{Account, Task, WorkerNode};

/// 一个可接收任务的节点及其绑定的账号
#[derive(Debug, Clone)]
pub struct DispatchCandidate {
    pub node: WorkerNode,
    pub account: Account,
}

impl DispatchCandidate {
    /// 是否满足任务的节点/账号亲和要求
    pub fn matches(&self, task: &Task) -> bool {
        task.node_affinity.map_or(true, |id| id == self.node.id)
            && task.account_affinity.map_or(true, |id| id == self.account.id)
    }
}

/// 在多个候选节点间选择一个
#[async_trait]
pub trait NodeSelectionStrategy: Send + Sync {
    /// 返回被选中节点的ID，候选为空时返回 None
    async fn select_node(
        &self,
        task: &Task,
        candidates: &[DispatchCandidate],
    ) -> FleetResult<Option<i64>>;

    fn name(&self) -> &str;
}

pub struct FirstAvailableStrategy;

pub struct RoundRobinStrategy {
    counter: AtomicUsize,
}

impl FirstAvailableStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FirstAvailableStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeSelectionStrategy for FirstAvailableStrategy {
    async fn select_node(
        &self,
        task: &Task,
        candidates: &[DispatchCandidate],
    ) -> FleetResult<Option<i64>> {
        let selected = candidates.iter().map(|c| c.node.id).min();

        if let Some(node_id) = selected {
            debug!("首个可用策略为任务 {} 选择节点: {}", task.id, node_id);
        }
        Ok(selected)
    }

    fn name(&self) -> &str {
        "FirstAvailable"
    }
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeSelectionStrategy for RoundRobinStrategy {
    async fn select_node(
        &self,
        task: &Task,
        candidates: &[DispatchCandidate],
    ) -> FleetResult<Option<i64>> {
        if candidates.is_empty() {
            debug!("没有可用的节点");
            return Ok(None);
        }

        let mut ids: Vec<i64> = candidates.iter().map(|c| c.node.id).collect();
        ids.sort_unstable();

        let index = self.counter.fetch_add(1, Ordering::Relaxed) % ids.len();
        let selected = ids[index];

        debug!(
            "轮询策略为任务 {} 选择节点: {} (索引: {}/{})",
            task.id,
            selected,
            index,
            ids.len()
        );

        Ok(Some(selected))
    }

    fn name(&self) -> &str {
        "RoundRobin"
    }
}

pub fn strategy_for(selection: NodeSelection) -> Arc<dyn NodeSelectionStrategy> {
    match selection {
        NodeSelection::FirstAvailable => Arc::new(FirstAvailableStrategy::new()),
        NodeSelection::RoundRobin => Arc::new(RoundRobinStrategy::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_domain::entities::{NewTask, TaskPayload};

    fn candidate(node_id: i64, account_id: i64) -> DispatchCandidate {
        let mut account = Account::new(format!("acc-{account_id}"), serde_json::json!({}));
        account.id = account_id;
        account.assigned_node = Some(node_id);
        DispatchCandidate {
            node: WorkerNode::new(node_id, "127.0.0.1"),
            account,
        }
    }

    fn task() -> Task {
        Task::new(NewTask::new(TaskPayload::Comment {
            target_post_id: "post-1".to_string(),
            content: "不错".to_string(),
        }))
    }

    #[tokio::test]
    async fn test_first_available_picks_lowest_id() {
        let strategy = FirstAvailableStrategy::new();
        let candidates = vec![candidate(3, 30), candidate(1, 10), candidate(2, 20)];
        assert_eq!(strategy.select_node(&task(), &candidates).await.unwrap(), Some(1));
        assert_eq!(strategy.select_node(&task(), &[]).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_round_robin_rotates() {
        let strategy = RoundRobinStrategy::new();
        let candidates = vec![candidate(2, 20), candidate(1, 10)];

        let mut picks = Vec::new();
        for _ in 0..4 {
            picks.push(strategy.select_node(&task(), &candidates).await.unwrap().unwrap());
        }
        assert_eq!(picks, vec![1, 2, 1, 2]);
    }

    #[test]
    fn test_candidate_affinity() {
        let mut t = task();
        let c = candidate(1, 10);
        assert!(c.matches(&t));

        t.account_affinity = Some(11);
        assert!(!c.matches(&t));

        t.account_affinity = Some(10);
        t.node_affinity = Some(1);
        assert!(c.matches(&t));
    }
}
