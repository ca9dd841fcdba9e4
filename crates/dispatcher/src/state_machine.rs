//! 任务状态机
//!
//! 任务和节点的所有写操作都经过同一把锁完成。依赖门以父任务持久化的
//! 结果为准：回复任务在派发时才把父任务结果写入负载，和 dispatched
//! 状态同一次写入，因此完成回报之后的任何一步写入失败都不会让依赖链卡住。

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use fleet_core::{FleetError, FleetResult};
use fleet_domain::{
    entities::{NewTask, NodeMetrics, NodeStatus, Task, TaskStatus, WorkerNode},
    messaging::{CompletionAck, CompletionReport, TaskOutcome},
    repositories::{AccountRepository, NodeRepository, TaskRepository},
};
use fleet_infrastructure::MetricsCollector;

pub struct TaskStateMachine {
    tasks: Arc<dyn TaskRepository>,
    nodes: Arc<dyn NodeRepository>,
    accounts: Arc<dyn AccountRepository>,
    max_retries: i32,
    metrics: Arc<MetricsCollector>,
    write_lock: Mutex<()>,
}

/// 派发顺序：优先级高者优先，其次按计划时间、创建时间，最后按ID
pub fn dispatch_order(a: &Task, b: &Task) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| {
            let a_at = a.scheduled_at.unwrap_or(a.created_at);
            let b_at = b.scheduled_at.unwrap_or(b.created_at);
            a_at.cmp(&b_at)
        })
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

impl TaskStateMachine {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        nodes: Arc<dyn NodeRepository>,
        accounts: Arc<dyn AccountRepository>,
        max_retries: i32,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            tasks,
            nodes,
            accounts,
            max_retries,
            metrics,
            write_lock: Mutex::new(()),
        }
    }

    pub fn max_retries(&self) -> i32 {
        self.max_retries
    }

    pub async fn get_task(&self, task_id: i64) -> FleetResult<Task> {
        self.tasks
            .find_by_id(task_id)
            .await?
            .ok_or(FleetError::TaskNotFound { id: task_id })
    }

    async fn load_node(&self, node_id: i64) -> FleetResult<WorkerNode> {
        self.nodes
            .find_by_id(node_id)
            .await?
            .ok_or(FleetError::NodeNotFound { id: node_id })
    }

    /// 创建任务，回复类型要求父任务存在且尚未失败
    pub async fn create_task(&self, new_task: NewTask) -> FleetResult<Task> {
        new_task.payload.validate()?;

        let _guard = self.write_lock.lock().await;
        let mut task = Task::new(new_task);

        if let Some(parent_id) = task.parent_task_id() {
            let parent = self.tasks.find_by_id(parent_id).await?.ok_or_else(|| {
                FleetError::InvalidTaskParams(format!("父任务不存在: {parent_id}"))
            })?;

            match (parent.status, parent.result.as_deref()) {
                (TaskStatus::Failed, _) | (TaskStatus::Completed, None) => {
                    return Err(FleetError::InvalidTaskParams(format!(
                        "父任务 {parent_id} 已结束且没有可用结果"
                    )));
                }
                (TaskStatus::Completed, Some(result)) => {
                    task.payload.inject_parent_result(result);
                }
                _ => {}
            }
        }

        if let Some(account_id) = task.account_affinity {
            if self.accounts.find_by_id(account_id).await?.is_none() {
                return Err(FleetError::AccountNotFound { id: account_id });
            }
        }

        if let Some(node_id) = task.node_affinity {
            if self.nodes.find_by_id(node_id).await?.is_none() {
                return Err(FleetError::NodeNotFound { id: node_id });
            }
        }

        let created = self.tasks.create(&task).await?;
        self.metrics.record_task_created(created.kind().as_str());
        info!("创建任务: {}", created.entity_description());
        Ok(created)
    }

    /// 依赖门：回复任务只有在父任务已完成且结果非空后才可派发
    pub async fn is_dependency_satisfied(&self, task: &Task) -> FleetResult<bool> {
        if task.parent_task_id().is_none() {
            return Ok(true);
        }
        Ok(self.completed_parent_result(task).await?.is_some())
    }

    /// 父任务已完成时返回其结果，其余情况返回 None
    async fn completed_parent_result(&self, task: &Task) -> FleetResult<Option<String>> {
        let Some(parent_id) = task.parent_task_id() else {
            return Ok(None);
        };

        Ok(self
            .tasks
            .find_by_id(parent_id)
            .await?
            .filter(|p| p.status == TaskStatus::Completed)
            .and_then(|p| p.result))
    }

    /// 已到期且通过依赖门的待派发任务，按派发顺序排列
    ///
    /// 回复任务返回时负载中已带上父任务结果，持久化在 [`Self::assign`] 中完成。
    pub async fn eligible_pending(&self, now: DateTime<Utc>) -> FleetResult<Vec<Task>> {
        let mut eligible = Vec::new();
        for mut task in self.tasks.find_by_status(TaskStatus::Pending).await? {
            if !task.is_due(now) {
                continue;
            }
            if task.parent_task_id().is_none() {
                eligible.push(task);
                continue;
            }
            match self.completed_parent_result(&task).await? {
                Some(result) => {
                    task.payload.inject_parent_result(&result);
                    eligible.push(task);
                }
                None => debug!("任务 {} 的依赖尚未满足，暂不派发", task.id),
            }
        }

        eligible.sort_by(dispatch_order);
        Ok(eligible)
    }

    /// 原子地把任务标记为已派发并把节点标记为忙碌
    pub async fn assign(&self, task_id: i64, node_id: i64, account_id: i64) -> FleetResult<Task> {
        let _guard = self.write_lock.lock().await;

        let mut task = self.get_task(task_id).await?;
        if task.status != TaskStatus::Pending {
            return Err(FleetError::InvalidTransition {
                task_id,
                from: task.status.to_string(),
                to: TaskStatus::Dispatched.to_string(),
            });
        }

        if task.parent_task_id().is_some() {
            let Some(result) = self.completed_parent_result(&task).await? else {
                return Err(FleetError::DependencyNotSatisfied {
                    task_id,
                    reason: "父任务尚未完成或没有结果".to_string(),
                });
            };
            // 结果注入与状态迁移同一次写入
            task.payload.inject_parent_result(&result);
        }

        let mut node = self.load_node(node_id).await?;
        if !node.is_idle() {
            return Err(FleetError::NodeUnavailable { id: node_id });
        }

        task.transition_to(TaskStatus::Dispatched)?;
        task.assigned_node = Some(node_id);
        task.assigned_account = Some(account_id);
        node.assign(task_id);

        self.nodes.update(&node).await?;
        if let Err(e) = self.tasks.update(&task).await {
            node.release();
            if let Err(revert_err) = self.nodes.update(&node).await {
                warn!("回滚节点 {} 的忙碌状态失败: {}", node_id, revert_err);
            }
            return Err(e);
        }

        debug!("任务 {} 已分配给节点 {}", task_id, node_id);
        Ok(task)
    }

    /// 会话推送失败时撤销分配，任务回到 pending 且不计重试次数
    pub async fn revert_assignment(&self, task_id: i64, node_id: i64) -> FleetResult<()> {
        let _guard = self.write_lock.lock().await;

        let mut task = self.get_task(task_id).await?;
        if task.status == TaskStatus::Dispatched && task.assigned_node == Some(node_id) {
            task.transition_to(TaskStatus::Pending)?;
            self.tasks.update(&task).await?;
        }

        self.release_node_if_holding(node_id, task_id).await?;
        info!("撤销任务 {} 对节点 {} 的分配", task_id, node_id);
        Ok(())
    }

    /// 节点回报开始执行，只接受来自当前分配节点的 dispatched 任务
    pub async fn mark_started(&self, task_id: i64, node_id: i64) -> FleetResult<bool> {
        let _guard = self.write_lock.lock().await;

        let mut task = self.get_task(task_id).await?;
        if task.status != TaskStatus::Dispatched || task.assigned_node != Some(node_id) {
            debug!(
                "忽略节点 {} 对任务 {} 的开始通知（当前状态: {}）",
                node_id, task_id, task.status
            );
            return Ok(false);
        }

        task.transition_to(TaskStatus::InProgress)?;
        self.tasks.update(&task).await?;
        debug!("任务 {} 开始在节点 {} 上执行", task_id, node_id);
        Ok(true)
    }

    /// 应用完成回报并释放依赖它的任务
    ///
    /// 终态任务的重复回报是无操作。成功回报在任何非终态下都会被接受，
    /// 失败回报只接受来自当前分配节点的，过期的失败回报视为无操作。
    pub async fn apply_completion(
        &self,
        task_id: i64,
        report: &CompletionReport,
    ) -> FleetResult<CompletionAck> {
        let _guard = self.write_lock.lock().await;

        let mut task = self.get_task(task_id).await?;
        if task.status.is_terminal() {
            debug!("任务 {} 已处于终态 {}，忽略重复回报", task_id, task.status);
            // 上一次应用可能在释放节点前失败，重复回报时补做
            for node_id in [task.assigned_node, Some(report.node_id)].into_iter().flatten() {
                self.release_node_if_holding(node_id, task_id).await?;
            }
            return Ok(CompletionAck {
                accepted: true,
                duplicate: true,
                status: task.status,
            });
        }

        let holder = task.assigned_node;
        match &report.outcome {
            TaskOutcome::Success { result } => {
                task.transition_to(TaskStatus::Completed)?;
                task.result = result.clone();
                task.error = None;
                self.tasks.update(&task).await?;
                self.metrics.record_task_completed();
                info!(
                    "任务 {} 由节点 {} 完成，结果: {:?}",
                    task_id, report.node_id, result
                );

                for node_id in [holder, Some(report.node_id)].into_iter().flatten() {
                    self.release_node_if_holding(node_id, task_id).await?;
                }

                self.release_dependents(&task).await?;
            }
            TaskOutcome::Failure { error } => {
                if holder != Some(report.node_id) {
                    warn!(
                        "忽略节点 {} 对任务 {} 的过期失败回报（当前分配节点: {:?}）",
                        report.node_id, task_id, holder
                    );
                    return Ok(CompletionAck {
                        accepted: true,
                        duplicate: true,
                        status: task.status,
                    });
                }

                warn!("任务 {} 在节点 {} 上执行失败: {}", task_id, report.node_id, error);
                self.release_node_if_holding(report.node_id, task_id)
                    .await?;
                self.requeue_or_fail(&mut task, error.clone()).await?;
            }
        }

        Ok(CompletionAck {
            accepted: true,
            duplicate: false,
            status: task.status,
        })
    }

    /// 记录心跳，未知节点自动注册；离线节点恢复在线但不覆盖忙碌状态
    pub async fn record_heartbeat(
        &self,
        node_id: i64,
        metrics: Option<NodeMetrics>,
        address: Option<&str>,
        now: DateTime<Utc>,
    ) -> FleetResult<WorkerNode> {
        let _guard = self.write_lock.lock().await;

        let mut node = match self.nodes.find_by_id(node_id).await? {
            Some(node) => node,
            None => {
                info!("自动注册新节点: {}", node_id);
                WorkerNode::new(node_id, address.unwrap_or("unknown"))
            }
        };

        if let Some(address) = address {
            node.address = address.to_string();
        }
        if let Some(metrics) = metrics {
            node.metrics = metrics;
        }
        node.last_heartbeat = Some(now);

        if node.status == NodeStatus::Offline {
            node.status = if node.current_task.is_some() {
                NodeStatus::Busy
            } else {
                NodeStatus::Online
            };
            info!("节点 {} 恢复在线", node_id);
        }
        node.updated_at = now;

        self.nodes.register(&node).await
    }

    /// 把超过阈值未发心跳的节点标记为离线，并回收其在途任务
    pub async fn sweep_offline(
        &self,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> FleetResult<Vec<i64>> {
        let _guard = self.write_lock.lock().await;

        let threshold = chrono::Duration::from_std(threshold)
            .map_err(|e| FleetError::Configuration(format!("离线阈值无效: {e}")))?;
        let cutoff = now - threshold;
        let mut offline = Vec::new();

        for mut node in self.nodes.find_all().await? {
            if node.status == NodeStatus::Offline {
                continue;
            }

            let last_seen = node.last_heartbeat.unwrap_or(node.registered_at);
            if last_seen >= cutoff {
                continue;
            }

            warn!(
                "节点 {} 心跳超时 (上次心跳: {})，标记为离线",
                node.id,
                last_seen.format("%Y-%m-%d %H:%M:%S UTC")
            );

            if let Some(task_id) = node.current_task.take() {
                if let Some(mut task) = self.tasks.find_by_id(task_id).await? {
                    if !task.status.is_terminal() && task.assigned_node == Some(node.id) {
                        self.requeue_or_fail(&mut task, format!("节点 {} 心跳超时", node.id))
                            .await?;
                    }
                }
            }

            node.status = NodeStatus::Offline;
            node.updated_at = now;
            self.nodes.update(&node).await?;
            offline.push(node.id);
        }

        Ok(offline)
    }

    /// 重连宽限期结束后仍停留在 dispatched 的任务重新入队
    ///
    /// 只处理在 `dispatched_before` 之前派发的任务，不增加重试次数，
    /// 因为动作从未开始执行。
    pub async fn requeue_stale_dispatched(
        &self,
        node_id: i64,
        dispatched_before: DateTime<Utc>,
    ) -> FleetResult<Vec<i64>> {
        let _guard = self.write_lock.lock().await;

        let mut requeued = Vec::new();
        for mut task in self.tasks.find_by_status(TaskStatus::Dispatched).await? {
            if task.assigned_node != Some(node_id) {
                continue;
            }
            if task.dispatched_at.is_some_and(|at| at > dispatched_before) {
                continue;
            }

            task.transition_to(TaskStatus::Pending)?;
            self.tasks.update(&task).await?;
            self.release_node_if_holding(node_id, task.id).await?;
            self.metrics.record_task_requeued("reconnect");
            info!("节点 {} 重连后任务 {} 仍未开始，重新入队", node_id, task.id);
            requeued.push(task.id);
        }

        Ok(requeued)
    }

    async fn release_node_if_holding(&self, node_id: i64, task_id: i64) -> FleetResult<()> {
        if let Some(mut node) = self.nodes.find_by_id(node_id).await? {
            if node.current_task == Some(task_id) {
                node.release();
                self.nodes.update(&node).await?;
            }
        }
        Ok(())
    }

    /// 重试次数未用尽则回到 pending，否则进入终态 failed 并级联失败
    async fn requeue_or_fail(&self, task: &mut Task, reason: String) -> FleetResult<()> {
        task.error = Some(reason);

        if task.retry_count < self.max_retries {
            task.retry_count += 1;
            task.transition_to(TaskStatus::Pending)?;
            self.tasks.update(task).await?;
            self.metrics.record_task_requeued("failure");
            info!(
                "任务 {} 重新入队 (重试 {}/{})",
                task.id, task.retry_count, self.max_retries
            );
        } else {
            task.transition_to(TaskStatus::Failed)?;
            self.tasks.update(task).await?;
            self.metrics.record_task_failed();
            warn!(
                "任务 {} 重试次数已用尽，最终失败: {:?}",
                task.id, task.error
            );
            self.cascade_failure(task.id).await?;
        }
        Ok(())
    }

    /// 把父任务的结果注入等待中的回复任务；没有结果时它们永远无法派发，直接失败
    async fn release_dependents(&self, parent: &Task) -> FleetResult<()> {
        let Some(result) = parent.result.as_deref() else {
            let children = self.tasks.find_children(parent.id).await?;
            if !children.is_empty() {
                warn!("任务 {} 完成但没有结果，依赖它的任务无法继续", parent.id);
                self.cascade_failure(parent.id).await?;
            }
            return Ok(());
        };

        for mut child in self.tasks.find_children(parent.id).await? {
            if child.status != TaskStatus::Pending {
                continue;
            }
            if child.payload.inject_parent_result(result) {
                child.updated_at = Utc::now();
                self.tasks.update(&child).await?;
                info!(
                    "任务 {} 的结果已注入回复任务 {}，其可以被派发",
                    parent.id, child.id
                );
            }
        }
        Ok(())
    }

    async fn cascade_failure(&self, root_id: i64) -> FleetResult<()> {
        let mut worklist = vec![root_id];
        while let Some(parent_id) = worklist.pop() {
            for mut child in self.tasks.find_children(parent_id).await? {
                if child.status.is_terminal() {
                    continue;
                }
                child.error = Some(format!("父任务 {parent_id} 失败或没有结果"));
                child.transition_to(TaskStatus::Failed)?;
                self.tasks.update(&child).await?;
                self.metrics.record_task_failed();
                warn!("任务 {} 因父任务 {} 失败而级联失败", child.id, parent_id);
                worklist.push(child.id);
            }
        }
        Ok(())
    }
}
