use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use fleet_api::{create_app, AppState};
use fleet_core::{AppConfig, DispatcherConfig};
use fleet_dispatcher::{
    strategy_for, AccountService, CompletionService, DestinationService, HeartbeatMonitor,
    SessionHub, SessionService, TaskDispatcher, TaskStateMachine, VersionService,
};
use fleet_domain::messaging::ServerMessage;
use fleet_infrastructure::{init_metrics_exporter, MetricsCollector, Repositories};
use fleet_worker::{AgentExit, WorkerService};
use tokio::{net::TcpListener, sync::broadcast};
use tracing::{error, info, warn};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 协调服务：派发循环、心跳监控和 HTTP/WebSocket 接口
    Coordinator,
    /// 节点代理
    Agent,
    /// 同一进程内运行两者
    All,
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
}

impl Application {
    pub fn new(config: AppConfig, mode: AppMode) -> Self {
        info!("初始化应用程序，模式: {:?}", mode);
        Self { config, mode }
    }

    /// 运行应用程序，节点代理因自更新退出时返回其退出原因
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<Option<AgentExit>> {
        info!("启动应用程序，模式: {:?}", self.mode);

        match self.mode {
            AppMode::Coordinator => {
                self.run_coordinator(shutdown_rx).await?;
                Ok(None)
            }
            AppMode::Agent => self.run_agent(shutdown_rx).await.map(Some),
            AppMode::All if !self.config.worker.enabled => {
                info!("节点代理未启用，仅运行协调服务");
                self.run_coordinator(shutdown_rx).await?;
                Ok(None)
            }
            AppMode::All => {
                let (coordinator, agent) = tokio::join!(
                    self.run_coordinator(shutdown_rx.resubscribe()),
                    self.run_agent(shutdown_rx),
                );
                coordinator?;
                agent.map(Some)
            }
        }
    }

    /// 运行协调服务
    async fn run_coordinator(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动协调服务");

        let (repos, database) = Repositories::connect(&self.config.database)
            .await
            .context("初始化存储失败")?;

        if self.config.observability.metrics_enabled {
            init_metrics_exporter(&self.config.observability.metrics_bind_address)?;
        }

        let config = &self.config.dispatcher;
        let metrics = Arc::new(MetricsCollector::new());
        let state_machine = Arc::new(TaskStateMachine::new(
            repos.tasks.clone(),
            repos.nodes.clone(),
            repos.accounts.clone(),
            config.max_retries,
            metrics.clone(),
        ));
        let hub = Arc::new(SessionHub::new(config.session_buffer));
        let dispatcher = Arc::new(TaskDispatcher::new(
            state_machine.clone(),
            repos.nodes.clone(),
            repos.accounts.clone(),
            hub.clone(),
            strategy_for(config.node_selection),
            metrics.clone(),
            config.clone(),
        ));
        let monitor = Arc::new(HeartbeatMonitor::new(
            state_machine.clone(),
            repos.nodes.clone(),
            metrics.clone(),
            config.clone(),
        ));

        let payload_dir = PathBuf::from(&self.config.api.payload_dir);
        tokio::fs::create_dir_all(&payload_dir)
            .await
            .with_context(|| format!("创建安装包目录失败: {}", payload_dir.display()))?;

        let state = AppState {
            tasks: repos.tasks.clone(),
            monitor: monitor.clone(),
            completions: Arc::new(CompletionService::new(
                state_machine.clone(),
                metrics.clone(),
            )),
            sessions: Arc::new(SessionService::new(
                hub.clone(),
                state_machine.clone(),
                metrics,
                config.reconnect_grace(),
            )),
            accounts: Arc::new(AccountService::new(repos.accounts.clone())),
            versions: Arc::new(VersionService::new(repos.versions.clone(), payload_dir)),
            destinations: Arc::new(DestinationService::new(self.config.destinations.clone())),
            state_machine,
        };

        let mut handles = Vec::new();

        if config.enabled {
            let dispatcher = Arc::clone(&dispatcher);
            let rx = shutdown_rx.resubscribe();
            handles.push(tokio::spawn(async move { dispatcher.run(rx).await }));
        } else {
            warn!("派发循环已在配置中禁用");
        }

        {
            let monitor = Arc::clone(&monitor);
            let rx = shutdown_rx.resubscribe();
            handles.push(tokio::spawn(async move { monitor.run(rx).await }));
        }

        let server_handle = if self.config.api.enabled {
            let listener = TcpListener::bind(&self.config.api.bind_address)
                .await
                .with_context(|| format!("绑定地址失败: {}", self.config.api.bind_address))?;
            info!("API服务器启动在 http://{}", self.config.api.bind_address);

            let app = create_app(state);
            let mut server_rx = shutdown_rx.resubscribe();
            Some(tokio::spawn(async move {
                let result = axum::serve(
                    listener,
                    app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
                )
                .with_graceful_shutdown(async move {
                    let _ = server_rx.recv().await;
                })
                .await;
                if let Err(e) = result {
                    error!("API服务器运行失败: {}", e);
                }
            }))
        } else {
            warn!("API服务已在配置中禁用，节点将无法连接");
            None
        };

        let _ = shutdown_rx.recv().await;
        info!("协调服务收到关闭信号");

        notify_nodes_on_shutdown(&hub, config).await;

        for handle in handles {
            let _ = handle.await;
        }
        if let Some(handle) = server_handle {
            let _ = handle.await;
        }
        if let Some(database) = database {
            database.close().await;
        }

        info!("协调服务已停止");
        Ok(())
    }

    /// 运行节点代理
    async fn run_agent(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<AgentExit> {
        info!("启动节点代理: {}", self.config.worker.node_id);

        let worker = WorkerService::builder(self.config.worker.clone())
            .build()
            .context("创建节点代理失败")?;
        let exit = worker.run(shutdown_rx).await.context("节点代理运行失败")?;

        info!("节点代理已退出: {:?}", exit);
        Ok(exit)
    }
}

/// 按配置决定是否让已连接的节点随协调服务一起退出，返回通知的节点数
async fn notify_nodes_on_shutdown(hub: &SessionHub, config: &DispatcherConfig) -> usize {
    if !config.shutdown_notify_nodes {
        info!("保留节点会话，节点将在协调服务恢复后重连");
        return 0;
    }

    let notified = hub.broadcast(ServerMessage::Shutdown).await;
    info!("已通知 {} 个节点关闭", notified);
    notified
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_nodes_not_notified_by_default() {
        let hub = SessionHub::new(4);
        let mut registration = hub.register(1).await;

        let notified = notify_nodes_on_shutdown(&hub, &DispatcherConfig::default()).await;
        assert_eq!(notified, 0);
        assert!(registration.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_nodes_notified_when_enabled() {
        let hub = SessionHub::new(4);
        let mut registration = hub.register(1).await;
        let config = DispatcherConfig {
            shutdown_notify_nodes: true,
            ..DispatcherConfig::default()
        };

        assert_eq!(notify_nodes_on_shutdown(&hub, &config).await, 1);
        assert_eq!(registration.receiver.recv().await, Some(ServerMessage::Shutdown));
    }
}
