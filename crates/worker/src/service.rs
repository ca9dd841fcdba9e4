use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use fleet_core::{Clock, FleetError, FleetResult, RetryPolicy, SystemClock, WorkerConfig};
use fleet_domain::messaging::{NodeMessage, ServerMessage};
use fleet_domain::value_objects::SemanticVersion;

use crate::components::session_client::{self, Inbound};
use crate::components::{
    AgentState, CompletionReporter, CoordinatorApi, DispatcherClient, HeartbeatManager,
    TaskExecutionManager,
};
use crate::executors::{ExternalCommandExecutor, TaskExecutor};
use crate::updater::{ExecRelauncher, ProcessRelauncher, UpdateOutcome, Updater};

/// 代理循环的退出原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentExit {
    /// 本地或服务端要求关闭
    Shutdown,
    /// 已更新到新版本并启动了新进程，旧进程应当退出
    Relaunched { version: SemanticVersion },
}

/// 单次会话的结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Disconnected,
    ServerShutdown,
    LocalShutdown,
}

/// Worker服务构建器
pub struct WorkerServiceBuilder {
    config: WorkerConfig,
    api: Option<Arc<dyn CoordinatorApi>>,
    executor: Option<Arc<dyn TaskExecutor>>,
    clock: Arc<dyn Clock>,
    relauncher: Arc<dyn ProcessRelauncher>,
    self_update: bool,
}

impl WorkerServiceBuilder {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            api: None,
            executor: None,
            clock: Arc::new(SystemClock),
            relauncher: Arc::new(ExecRelauncher),
            self_update: true,
        }
    }

    /// 替换默认的 HTTP 客户端
    pub fn coordinator(mut self, api: Arc<dyn CoordinatorApi>) -> Self {
        self.api = Some(api);
        self
    }

    /// 替换默认的外部命令执行器
    pub fn executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn relauncher(mut self, relauncher: Arc<dyn ProcessRelauncher>) -> Self {
        self.relauncher = relauncher;
        self
    }

    /// 关闭启动时的版本检查
    pub fn self_update(mut self, enabled: bool) -> Self {
        self.self_update = enabled;
        self
    }

    pub fn build(self) -> FleetResult<WorkerService> {
        self.config
            .validate()
            .map_err(|e| FleetError::Configuration(e.to_string()))?;

        let current_version: SemanticVersion = self.config.agent_version.parse()?;
        let api: Arc<dyn CoordinatorApi> = match self.api {
            Some(api) => api,
            None => Arc::new(DispatcherClient::new(
                &self.config.server_url,
                Duration::from_secs(30),
            )?),
        };
        let executor: Arc<dyn TaskExecutor> = match self.executor {
            Some(executor) => executor,
            None => Arc::new(ExternalCommandExecutor::new(
                self.config.executor_command.clone(),
                self.config.executor_args.clone(),
                Duration::from_secs(self.config.execution_timeout_seconds),
            )),
        };

        let state = Arc::new(AgentState::new(
            self.config.node_id,
            self.config.agent_version.clone(),
        ));
        let reporter = Arc::new(CompletionReporter::new(
            self.config.node_id,
            Arc::clone(&api),
            self.config.ack_retry_policy(),
            Arc::clone(&self.clock),
            Arc::clone(state.pending()),
        ));
        let execution = Arc::new(TaskExecutionManager::new(
            Arc::clone(&state),
            executor,
            Arc::clone(&reporter),
            Arc::clone(&api),
        ));
        let heartbeat = Arc::new(HeartbeatManager::new(
            Arc::clone(&state),
            Duration::from_secs(self.config.heartbeat_interval_seconds),
        ));

        let updater = if self.self_update {
            let install_path = match &self.config.install_path {
                Some(path) => PathBuf::from(path),
                None => std::env::current_exe()?,
            };
            Some(Updater::new(
                Arc::clone(&api),
                current_version,
                install_path,
                self.relauncher,
            ))
        } else {
            None
        };

        Ok(WorkerService {
            reconnect_policy: self.config.reconnect_policy(),
            config: self.config,
            api,
            state,
            reporter,
            execution,
            heartbeat,
            updater,
            clock: self.clock,
        })
    }
}

/// 节点代理：启动检查、会话维持、任务执行与结果上报
pub struct WorkerService {
    config: WorkerConfig,
    api: Arc<dyn CoordinatorApi>,
    state: Arc<AgentState>,
    reporter: Arc<CompletionReporter>,
    execution: Arc<TaskExecutionManager>,
    heartbeat: Arc<HeartbeatManager>,
    updater: Option<Updater>,
    clock: Arc<dyn Clock>,
    reconnect_policy: RetryPolicy,
}

impl WorkerService {
    pub fn builder(config: WorkerConfig) -> WorkerServiceBuilder {
        WorkerServiceBuilder::new(config)
    }

    pub fn state(&self) -> &Arc<AgentState> {
        &self.state
    }

    pub fn reporter(&self) -> &Arc<CompletionReporter> {
        &self.reporter
    }

    /// 启动时查询并保存绑定的账号，未绑定时节点仍然上线但不会被派发任务
    pub async fn setup_account(&self) {
        match self.api.get_assigned_account(self.config.node_id).await {
            Ok(Some(account)) => {
                info!("节点 {} 使用账号: {} (ID: {})", self.config.node_id, account.name, account.id);
                self.state.set_account(Some(account)).await;
            }
            Ok(None) => {
                warn!("节点 {} 尚未绑定账号", self.config.node_id);
                self.state.set_account(None).await;
            }
            Err(e) => warn!("查询节点 {} 的账号失败: {}", self.config.node_id, e),
        }
    }

    /// 运行代理直到关闭或完成自更新
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> FleetResult<AgentExit> {
        info!(
            "节点代理启动: node_id={}, version={}, server={}",
            self.config.node_id, self.config.agent_version, self.config.server_url
        );

        if let Some(updater) = &self.updater {
            match updater.check_and_update().await {
                Ok(UpdateOutcome::Updated { from, to }) => {
                    info!("已从 {} 更新到 {}，退出旧进程", from, to);
                    return Ok(AgentExit::Relaunched { version: to });
                }
                Ok(UpdateOutcome::UpToDate { .. }) => {}
                Err(e) => warn!("版本更新失败，继续使用当前版本: {}", e),
            }
        }

        self.setup_account().await;

        let (stop_tx, stop_rx) = broadcast::channel(1);
        let execution = Arc::clone(&self.execution);
        let execution_handle = tokio::spawn(async move { execution.run(stop_rx).await });

        let result = self.session_loop(&mut shutdown_rx).await;

        self.graceful_stop().await;
        let _ = stop_tx.send(());
        if let Err(e) = execution_handle.await {
            error!("任务执行循环异常退出: {}", e);
        }

        result.map(|()| AgentExit::Shutdown)
    }

    /// 会话连接与重连退避
    async fn session_loop(&self, shutdown_rx: &mut broadcast::Receiver<()>) -> FleetResult<()> {
        let endpoint = self.config.session_endpoint();
        let mut attempt: u32 = 0;

        loop {
            let connected = tokio::select! {
                connected = session_client::connect(&endpoint) => connected,
                _ = shutdown_rx.recv() => return Ok(()),
            };

            match connected {
                Ok(stream) => {
                    attempt = 0;
                    match self.run_session(stream, shutdown_rx).await {
                        SessionEnd::Disconnected => {
                            warn!("会话断开，准备重连");
                        }
                        SessionEnd::ServerShutdown => {
                            info!("服务端要求关闭节点");
                            return Ok(());
                        }
                        SessionEnd::LocalShutdown => return Ok(()),
                    }
                }
                Err(e) => {
                    attempt += 1;
                    if !self.reconnect_policy.allows_another(attempt) {
                        error!("会话重连 {} 次均失败，放弃", attempt);
                        return Err(e);
                    }
                    let delay = self.reconnect_policy.delay_for_attempt(attempt);
                    warn!("第 {} 次连接会话失败: {}，{:?} 后重试", attempt, e, delay);
                    tokio::select! {
                        _ = self.clock.sleep(delay) => {}
                        _ = shutdown_rx.recv() => return Ok(()),
                    }
                }
            }
        }
    }

    async fn run_session(
        &self,
        stream: session_client::SessionStream,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> SessionEnd {
        use futures::StreamExt;

        let (mut sink, mut inbound) = stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<NodeMessage>(64);
        self.state.attach_session(out_tx.clone()).await;

        // 重连成功后先冲刷待确认队列，再恢复正常流程
        let remaining = self.reporter.try_flush().await;
        if remaining > 0 {
            warn!("仍有 {} 条完成报告待确认", remaining);
        }

        let heartbeat = Arc::clone(&self.heartbeat);
        let heartbeat_handle = tokio::spawn(async move { heartbeat.run(out_tx).await });
        let reporter = Arc::clone(&self.reporter);
        let flush_period = Duration::from_secs(self.config.ack_retry_interval_seconds);
        let flush_handle =
            tokio::spawn(async move { reporter.run_periodic_flush(flush_period).await });

        let end = loop {
            tokio::select! {
                outgoing = out_rx.recv() => {
                    let Some(message) = outgoing else { break SessionEnd::Disconnected };
                    if let Err(e) = session_client::send(&mut sink, &message).await {
                        warn!("发送 {} 失败: {}", message.message_type(), e);
                        break SessionEnd::Disconnected;
                    }
                }
                frame = session_client::next_inbound(&mut inbound) => {
                    match frame {
                        Inbound::Message(ServerMessage::NewTask { task }) => {
                            debug!("收到任务 {} ({})", task.id, task.kind().as_str());
                            if let Err(e) = self.execution.enqueue(task).await {
                                error!("任务入队失败: {}", e);
                            }
                        }
                        Inbound::Message(ServerMessage::Shutdown) => break SessionEnd::ServerShutdown,
                        Inbound::Ignored => {}
                        Inbound::Closed => break SessionEnd::Disconnected,
                    }
                }
                _ = shutdown_rx.recv() => break SessionEnd::LocalShutdown,
            }
        };

        heartbeat_handle.abort();
        flush_handle.abort();
        self.state.detach_session().await;
        if end != SessionEnd::Disconnected {
            use futures::SinkExt;
            let _ = sink.close().await;
        }
        end
    }

    /// 停止接收新任务，等待执行中的任务，最后冲刷待确认队列
    async fn graceful_stop(&self) {
        self.state.stop_accepting();
        let grace = Duration::from_secs(self.config.shutdown_grace_seconds);
        if !self.execution.wait_idle(grace).await {
            warn!("宽限期内任务未结束，服务端将在离线后重新派发");
        }

        let remaining = self.reporter.try_flush().await;
        if remaining > 0 {
            warn!("关闭时仍有 {} 条完成报告未确认", remaining);
        }
        info!("节点 {} 已停止", self.config.node_id);
    }
}
