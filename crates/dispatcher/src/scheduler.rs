use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use fleet_core::{DispatcherConfig, FleetResult};
use fleet_domain::{
    entities::Account,
    messaging::ServerMessage,
    repositories::{AccountRepository, NodeRepository},
};
use fleet_infrastructure::MetricsCollector;

use crate::session_hub::SessionPusher;
use crate::state_machine::TaskStateMachine;
use crate::strategies::{DispatchCandidate, NodeSelectionStrategy};

/// 一次成功的派发
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    pub task_id: i64,
    pub node_id: i64,
}

/// 把可派发的任务配对给空闲节点
pub struct TaskDispatcher {
    state: Arc<TaskStateMachine>,
    nodes: Arc<dyn NodeRepository>,
    accounts: Arc<dyn AccountRepository>,
    sessions: Arc<dyn SessionPusher>,
    strategy: Arc<dyn NodeSelectionStrategy>,
    metrics: Arc<MetricsCollector>,
    config: DispatcherConfig,
}

impl TaskDispatcher {
    pub fn new(
        state: Arc<TaskStateMachine>,
        nodes: Arc<dyn NodeRepository>,
        accounts: Arc<dyn AccountRepository>,
        sessions: Arc<dyn SessionPusher>,
        strategy: Arc<dyn NodeSelectionStrategy>,
        metrics: Arc<MetricsCollector>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            state,
            nodes,
            accounts,
            sessions,
            strategy,
            metrics,
            config,
        }
    }

    /// 在线、空闲、会话已连接且绑定了有效账号的节点
    async fn collect_candidates(&self) -> FleetResult<Vec<DispatchCandidate>> {
        let accounts_by_node: HashMap<i64, Account> = self
            .accounts
            .find_all()
            .await?
            .into_iter()
            .filter(|a| a.is_active())
            .filter_map(|a| a.assigned_node.map(|node_id| (node_id, a)))
            .collect();

        let mut candidates = Vec::new();
        for node in self.nodes.find_all().await? {
            if !node.is_idle() {
                continue;
            }
            let Some(account) = accounts_by_node.get(&node.id) else {
                debug!("节点 {} 没有绑定有效账号，跳过", node.id);
                continue;
            };
            if !self.sessions.is_connected(node.id).await {
                debug!("节点 {} 会话未连接，跳过", node.id);
                continue;
            }
            candidates.push(DispatchCandidate {
                node,
                account: account.clone(),
            });
        }
        Ok(candidates)
    }

    /// 执行一轮派发
    pub async fn dispatch_once(&self) -> FleetResult<Vec<Dispatch>> {
        let start_time = Instant::now();
        let tasks = self.state.eligible_pending(Utc::now()).await?;
        self.metrics.update_pending_tasks(tasks.len());

        if tasks.is_empty() {
            return Ok(Vec::new());
        }

        let mut candidates = self.collect_candidates().await?;
        let mut dispatched = Vec::new();
        let mut used: HashSet<i64> = HashSet::new();

        for task in tasks {
            candidates.retain(|c| !used.contains(&c.node.id));
            if candidates.is_empty() {
                debug!("没有空闲节点，本轮派发结束");
                break;
            }

            let matching: Vec<DispatchCandidate> = candidates
                .iter()
                .filter(|c| c.matches(&task))
                .cloned()
                .collect();
            if matching.is_empty() {
                debug!("任务 {} 没有满足亲和要求的空闲节点", task.id);
                continue;
            }

            let Some(node_id) = self.strategy.select_node(&task, &matching).await? else {
                continue;
            };
            let Some(candidate) = matching.iter().find(|c| c.node.id == node_id) else {
                warn!("策略 {} 返回了非候选节点 {}", self.strategy.name(), node_id);
                continue;
            };

            let assigned = match self
                .state
                .assign(task.id, node_id, candidate.account.id)
                .await
            {
                Ok(task) => task,
                Err(e) => {
                    debug!("任务 {} 分配给节点 {} 失败: {}", task.id, node_id, e);
                    continue;
                }
            };
            used.insert(node_id);

            match self
                .sessions
                .push(node_id, ServerMessage::NewTask { task: assigned })
                .await
            {
                Ok(()) => {
                    self.metrics.record_task_dispatched(task.id, node_id);
                    info!("任务 {} 已派发到节点 {}", task.id, node_id);
                    dispatched.push(Dispatch {
                        task_id: task.id,
                        node_id,
                    });
                }
                Err(e) => {
                    self.metrics.record_push_failure();
                    warn!("向节点 {} 推送任务 {} 失败，撤销分配: {}", node_id, task.id, e);
                    if let Err(revert_err) = self.state.revert_assignment(task.id, node_id).await {
                        error!("撤销任务 {} 的分配失败: {}", task.id, revert_err);
                    }
                }
            }
        }

        self.metrics
            .record_dispatch_cycle(start_time.elapsed().as_secs_f64());
        Ok(dispatched)
    }

    /// 派发循环，直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "启动任务派发循环，间隔: {:?}，策略: {}",
            self.config.dispatch_interval(),
            self.strategy.name()
        );

        let mut ticker = tokio::time::interval(self.config.dispatch_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.dispatch_once().await {
                        Ok(dispatched) if !dispatched.is_empty() => {
                            debug!("本轮派发了 {} 个任务", dispatched.len());
                        }
                        Ok(_) => {}
                        Err(e) => error!("任务派发失败: {}", e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("收到关闭信号，停止任务派发循环");
                    break;
                }
            }
        }
    }
}
