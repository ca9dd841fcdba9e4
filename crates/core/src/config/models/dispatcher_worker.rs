use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// 空闲节点的选择策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeSelection {
    /// 节点ID最小者优先
    FirstAvailable,
    /// 在候选节点间轮询
    RoundRobin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    pub enabled: bool,
    pub dispatch_interval_ms: u64,
    pub heartbeat_interval_seconds: u64,
    /// 连续丢失多少次心跳后判定离线
    pub missed_heartbeats: u32,
    pub sweep_interval_seconds: u64,
    /// 调度层面的最大重试次数
    pub max_retries: i32,
    /// 重连后仍处于 dispatched 的任务在此宽限期后重新入队
    pub reconnect_grace_seconds: u64,
    pub node_selection: NodeSelection,
    /// 每个节点会话的出站消息缓冲
    pub session_buffer: usize,
    /// 协调服务关闭时是否向节点广播 SHUTDOWN，节点收到后会退出而不是等待重连
    #[serde(default)]
    pub shutdown_notify_nodes: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dispatch_interval_ms: 1000,
            heartbeat_interval_seconds: 10,
            missed_heartbeats: 3,
            sweep_interval_seconds: 5,
            max_retries: 3,
            reconnect_grace_seconds: 15,
            node_selection: NodeSelection::FirstAvailable,
            session_buffer: 64,
            shutdown_notify_nodes: false,
        }
    }
}

impl DispatcherConfig {
    /// 离线判定阈值 = 心跳间隔 × 允许丢失的心跳数
    pub fn offline_threshold(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds * self.missed_heartbeats as u64)
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    pub fn reconnect_grace(&self) -> Duration {
        Duration::from_secs(self.reconnect_grace_seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.dispatch_interval_ms == 0 {
            return Err(anyhow::anyhow!("调度间隔必须大于0"));
        }

        if self.heartbeat_interval_seconds == 0 {
            return Err(anyhow::anyhow!("心跳间隔必须大于0"));
        }

        if self.missed_heartbeats == 0 {
            return Err(anyhow::anyhow!("允许丢失的心跳数必须大于0"));
        }

        if self.offline_threshold() <= self.dispatch_interval() {
            return Err(anyhow::anyhow!(
                "离线阈值 {:?} 必须大于调度间隔 {:?}",
                self.offline_threshold(),
                self.dispatch_interval()
            ));
        }

        if self.sweep_interval_seconds == 0 {
            return Err(anyhow::anyhow!("离线扫描间隔必须大于0"));
        }

        if self.max_retries <= 0 {
            return Err(anyhow::anyhow!("最大重试次数必须大于0"));
        }

        if self.session_buffer == 0 {
            return Err(anyhow::anyhow!("会话缓冲区大小必须大于0"));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub node_id: i64,
    /// 协调服务的HTTP地址，例如 http://127.0.0.1:8080
    pub server_url: String,
    /// 会话通道地址，缺省时由 server_url 推导
    #[serde(default)]
    pub session_url: Option<String>,
    pub agent_version: String,
    pub heartbeat_interval_seconds: u64,
    pub ack_retry_interval_seconds: u64,
    pub ack_max_attempts: u32,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    /// 0 表示不限次数
    pub reconnect_max_attempts: u32,
    /// 执行浏览器动作的外部命令
    pub executor_command: String,
    #[serde(default)]
    pub executor_args: Vec<String>,
    pub execution_timeout_seconds: u64,
    pub shutdown_grace_seconds: u64,
    /// 自更新时被替换的文件，缺省为当前可执行文件
    #[serde(default)]
    pub install_path: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            node_id: 1,
            server_url: "http://127.0.0.1:8080".to_string(),
            session_url: None,
            agent_version: "1.0.0".to_string(),
            heartbeat_interval_seconds: 10,
            ack_retry_interval_seconds: 30,
            ack_max_attempts: 10,
            reconnect_base_ms: 1000,
            reconnect_max_ms: 30_000,
            reconnect_max_attempts: 0,
            executor_command: "publish-action".to_string(),
            executor_args: Vec::new(),
            execution_timeout_seconds: 300,
            shutdown_grace_seconds: 60,
            install_path: None,
        }
    }
}

impl WorkerConfig {
    /// 会话通道地址：显式配置优先，否则把 http(s) 换成 ws(s)
    pub fn session_endpoint(&self) -> String {
        match &self.session_url {
            Some(url) => url.clone(),
            None => {
                let base = self
                    .server_url
                    .trim_end_matches('/')
                    .replacen("https://", "wss://", 1)
                    .replacen("http://", "ws://", 1);
                format!("{}/ws/nodes/{}", base, self.node_id)
            }
        }
    }

    /// 完成确认的重试策略
    pub fn ack_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            Duration::from_secs(self.ack_retry_interval_seconds),
            self.ack_max_attempts,
        )
    }

    /// 会话重连的退避策略
    pub fn reconnect_policy(&self) -> RetryPolicy {
        let max_attempts = match self.reconnect_max_attempts {
            0 => None,
            n => Some(n),
        };
        RetryPolicy::exponential(
            Duration::from_millis(self.reconnect_base_ms),
            Duration::from_millis(self.reconnect_max_ms),
            2.0,
        )
        .with_jitter(0.1)
        .with_max_attempts(max_attempts)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.node_id <= 0 {
            return Err(anyhow::anyhow!("节点ID必须大于0"));
        }

        if !self.server_url.starts_with("http://") && !self.server_url.starts_with("https://") {
            return Err(anyhow::anyhow!("服务地址必须以 http:// 或 https:// 开头"));
        }

        if self.heartbeat_interval_seconds == 0 {
            return Err(anyhow::anyhow!("心跳间隔必须大于0"));
        }

        if self.ack_retry_interval_seconds == 0 || self.ack_max_attempts == 0 {
            return Err(anyhow::anyhow!("确认重试间隔和次数必须大于0"));
        }

        if self.reconnect_base_ms == 0 || self.reconnect_max_ms < self.reconnect_base_ms {
            return Err(anyhow::anyhow!("重连退避参数无效"));
        }

        if self.executor_command.is_empty() {
            return Err(anyhow::anyhow!("执行命令不能为空"));
        }

        if self.execution_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("执行超时时间必须大于0"));
        }

        if self.agent_version.split('.').count() != 3 {
            return Err(anyhow::anyhow!("节点版本号格式无效: {}", self.agent_version));
        }

        Ok(())
    }
}
