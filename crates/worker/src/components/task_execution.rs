use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{error, info, warn};

use fleet_core::{FleetError, FleetResult};
use fleet_domain::entities::{Task, TaskPayload};
use fleet_domain::messaging::{NodeMessage, TaskOutcome};

use super::agent_state::AgentState;
use super::completion_reporter::{CompletionReporter, ReportResult};
use super::dispatcher_client::CoordinatorApi;
use crate::executors::{ExecutionContext, TaskExecutor};

/// 本地任务队列与执行
///
/// 会话读循环只负责入队，执行在独立的任务里串行进行，
/// 长时间的动作不会阻塞心跳和消息收发。
pub struct TaskExecutionManager {
    state: Arc<AgentState>,
    executor: Arc<dyn TaskExecutor>,
    reporter: Arc<CompletionReporter>,
    api: Arc<dyn CoordinatorApi>,
    queue_tx: mpsc::UnboundedSender<Task>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<Task>>>,
    /// 已入队但尚未执行完的任务
    queued: Mutex<HashSet<i64>>,
}

impl TaskExecutionManager {
    pub fn new(
        state: Arc<AgentState>,
        executor: Arc<dyn TaskExecutor>,
        reporter: Arc<CompletionReporter>,
        api: Arc<dyn CoordinatorApi>,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            state,
            executor,
            reporter,
            api,
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            queued: Mutex::new(HashSet::new()),
        }
    }

    /// 收到 NEW_TASK 时入队，同一任务重复推送只执行一次
    pub async fn enqueue(&self, task: Task) -> FleetResult<bool> {
        if !self.state.is_accepting() {
            warn!("节点正在关闭，拒绝任务 {}", task.id);
            return Ok(false);
        }

        let mut queued = self.queued.lock().await;
        if !queued.insert(task.id) {
            info!("任务 {} 已在本地队列中，忽略重复推送", task.id);
            return Ok(false);
        }

        let task_id = task.id;
        if self.queue_tx.send(task).is_err() {
            queued.remove(&task_id);
            return Err(FleetError::Internal("本地任务队列已关闭".to_string()));
        }
        info!("任务 {} 加入本地队列 (排队: {})", task_id, queued.len());
        Ok(true)
    }

    pub async fn queued_len(&self) -> usize {
        self.queued.lock().await.len()
    }

    /// 执行一个任务并通过确认通道上报结果
    pub async fn execute_one(&self, task: Task) -> ReportResult {
        let task_id = task.id;
        self.state.set_in_flight(Some(task_id));
        self.state
            .send_event(NodeMessage::TaskStarted { id: task_id })
            .await;

        let context = self.build_context(task).await;
        let start_time = Instant::now();
        let outcome = match self.executor.execute(&context).await {
            Ok(result) => {
                info!(
                    "任务 {} 执行成功，用时 {:?}，结果: {:?}",
                    task_id,
                    start_time.elapsed(),
                    result
                );
                TaskOutcome::Success { result }
            }
            Err(e) => {
                error!("任务 {} 执行失败: {}", task_id, e);
                TaskOutcome::Failure {
                    error: e.to_string(),
                }
            }
        };
        self.state.record_executed();

        let event = match &outcome {
            TaskOutcome::Success { result } => NodeMessage::TaskCompleted {
                id: task_id,
                result: result.clone(),
            },
            TaskOutcome::Failure { error } => NodeMessage::TaskFailed {
                id: task_id,
                error: error.clone(),
            },
        };
        self.state.send_event(event).await;

        let report = self.reporter.report(task_id, outcome).await;
        self.state.set_in_flight(None);
        self.queued.lock().await.remove(&task_id);
        report
    }

    async fn build_context(&self, task: Task) -> ExecutionContext {
        let destination = match &task.payload {
            TaskPayload::Publish {
                destination: Some(name),
                ..
            }
            | TaskPayload::CreateDraft {
                destination: Some(name),
                ..
            } => match self.api.resolve_destination(name).await {
                Ok(Some(destination)) => Some(destination),
                Ok(None) => {
                    warn!("任务 {} 的目标版块 {} 未配置", task.id, name);
                    None
                }
                Err(e) => {
                    warn!("解析任务 {} 的目标版块 {} 失败: {}", task.id, name, e);
                    None
                }
            },
            _ => None,
        };

        ExecutionContext {
            account: self.state.account().await,
            destination,
            task,
        }
    }

    /// 串行执行本地队列，直到收到停止信号
    pub async fn run(&self, mut stop_rx: broadcast::Receiver<()>) {
        let Some(mut queue_rx) = self.queue_rx.lock().await.take() else {
            warn!("任务执行循环已经在运行");
            return;
        };

        info!("任务执行循环启动，执行器: {}", self.executor.name());
        loop {
            tokio::select! {
                task = queue_rx.recv() => {
                    let Some(task) = task else { break };
                    if !self.state.is_accepting() {
                        warn!("节点正在关闭，放弃尚未开始的任务 {}", task.id);
                        self.queued.lock().await.remove(&task.id);
                        continue;
                    }
                    self.execute_one(task).await;
                }
                _ = stop_rx.recv() => {
                    info!("任务执行循环停止");
                    break;
                }
            }
        }
    }

    /// 等待正在执行的任务结束，超时返回 false
    pub async fn wait_idle(&self, grace: Duration) -> bool {
        let mut in_flight = self.state.watch_in_flight();
        let idle = tokio::time::timeout(grace, async {
            // 发送端由 AgentState 持有，不会先于接收端关闭
            let _ = in_flight.wait_for(Option::is_none).await;
        })
        .await;

        if idle.is_err() {
            warn!(
                "等待任务 {:?} 结束超时，放弃执行中的任务",
                self.state.in_flight()
            );
            return false;
        }
        true
    }
}
