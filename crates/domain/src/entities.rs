use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use fleet_core::{FleetError, FleetResult};
use serde::{Deserialize, Serialize};

use crate::value_objects::SemanticVersion;

/// 工作节点
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerNode {
    pub id: i64,
    pub address: String,
    pub status: NodeStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub metrics: NodeMetrics,
    pub current_task: Option<i64>,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Offline,
    Online,
    Busy,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Offline => "offline",
            NodeStatus::Online => "online",
            NodeStatus::Busy => "busy",
        }
    }
}

impl FromStr for NodeStatus {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "offline" => Ok(NodeStatus::Offline),
            "online" => Ok(NodeStatus::Online),
            "busy" => Ok(NodeStatus::Busy),
            _ => Err(FleetError::Serialization(format!("无效的节点状态: {s}"))),
        }
    }
}

/// 节点上报的资源指标
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NodeMetrics {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub hostname: Option<String>,
    pub agent_version: Option<String>,
    pub uptime_seconds: u64,
    pub tasks_executed: u64,
    pub pending_completions: u32,
}

impl WorkerNode {
    pub fn new(id: i64, address: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            address: address.into(),
            status: NodeStatus::Offline,
            last_heartbeat: None,
            metrics: NodeMetrics::default(),
            current_task: None,
            registered_at: now,
            updated_at: now,
        }
    }

    /// 在线且空闲
    pub fn is_idle(&self) -> bool {
        self.status == NodeStatus::Online && self.current_task.is_none()
    }

    pub fn assign(&mut self, task_id: i64) {
        self.current_task = Some(task_id);
        self.status = NodeStatus::Busy;
        self.updated_at = Utc::now();
    }

    /// 释放当前任务，离线节点保持离线
    pub fn release(&mut self) -> Option<i64> {
        let task = self.current_task.take();
        if self.status == NodeStatus::Busy {
            self.status = NodeStatus::Online;
        }
        self.updated_at = Utc::now();
        task
    }

    pub fn is_consistent(&self) -> bool {
        self.current_task.is_none() || self.status == NodeStatus::Busy
    }
}

/// 自动化账号
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub id: i64,
    pub name: String,
    /// 不透明的凭据包，由节点侧的执行器解释
    pub credentials: serde_json::Value,
    pub assigned_node: Option<i64>,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Disabled,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Disabled => "disabled",
        }
    }
}

impl FromStr for AccountStatus {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AccountStatus::Active),
            "disabled" => Ok(AccountStatus::Disabled),
            _ => Err(FleetError::Serialization(format!("无效的账号状态: {s}"))),
        }
    }
}

impl Account {
    pub fn new(name: impl Into<String>, credentials: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            name: name.into(),
            credentials,
            assigned_node: None,
            status: AccountStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Publish,
    CreateDraft,
    Comment,
    Reply,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Publish => "publish",
            TaskKind::CreateDraft => "create_draft",
            TaskKind::Comment => "comment",
            TaskKind::Reply => "reply",
        }
    }
}

impl FromStr for TaskKind {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "publish" => Ok(TaskKind::Publish),
            "create_draft" => Ok(TaskKind::CreateDraft),
            "comment" => Ok(TaskKind::Comment),
            "reply" => Ok(TaskKind::Reply),
            _ => Err(FleetError::Serialization(format!("无效的任务类型: {s}"))),
        }
    }
}

/// 按任务类型区分的负载，每个变体只携带自己需要的字段
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPayload {
    Publish {
        title: String,
        content: String,
        /// 目标版块名称，节点通过目标查询接口解析
        #[serde(default)]
        destination: Option<String>,
    },
    CreateDraft {
        title: String,
        content: String,
        #[serde(default)]
        destination: Option<String>,
    },
    Comment {
        target_post_id: String,
        content: String,
    },
    Reply {
        parent_task_id: i64,
        content: String,
        /// 父任务完成后由调度器注入
        #[serde(default)]
        parent_result: Option<String>,
    },
}

impl TaskPayload {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskPayload::Publish { .. } => TaskKind::Publish,
            TaskPayload::CreateDraft { .. } => TaskKind::CreateDraft,
            TaskPayload::Comment { .. } => TaskKind::Comment,
            TaskPayload::Reply { .. } => TaskKind::Reply,
        }
    }

    pub fn parent_task_id(&self) -> Option<i64> {
        match self {
            TaskPayload::Reply { parent_task_id, .. } => Some(*parent_task_id),
            _ => None,
        }
    }

    pub fn parent_result(&self) -> Option<&str> {
        match self {
            TaskPayload::Reply { parent_result, .. } => parent_result.as_deref(),
            _ => None,
        }
    }

    /// 把父任务的结果写入回复负载，非回复类型返回 false
    pub fn inject_parent_result(&mut self, result: &str) -> bool {
        match self {
            TaskPayload::Reply { parent_result, .. } => {
                *parent_result = Some(result.to_string());
                true
            }
            _ => false,
        }
    }

    pub fn validate(&self) -> FleetResult<()> {
        let content = match self {
            TaskPayload::Publish { title, content, .. }
            | TaskPayload::CreateDraft { title, content, .. } => {
                if title.trim().is_empty() {
                    return Err(FleetError::InvalidTaskParams("标题不能为空".to_string()));
                }
                content
            }
            TaskPayload::Comment {
                target_post_id,
                content,
            } => {
                if target_post_id.trim().is_empty() {
                    return Err(FleetError::InvalidTaskParams(
                        "评论目标帖子ID不能为空".to_string(),
                    ));
                }
                content
            }
            TaskPayload::Reply {
                parent_task_id,
                content,
                ..
            } => {
                if *parent_task_id <= 0 {
                    return Err(FleetError::InvalidTaskParams(format!(
                        "无效的父任务ID: {parent_task_id}"
                    )));
                }
                content
            }
        };

        if content.trim().is_empty() {
            return Err(FleetError::InvalidTaskParams("内容不能为空".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Dispatched,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Dispatched => "dispatched",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// 状态只能向前推进，唯一的回退是重新入队到 pending
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Completed) | (_, Failed) => true,
            (Pending, Dispatched) => true,
            (Dispatched, InProgress) => true,
            (Dispatched, Pending) | (InProgress, Pending) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "dispatched" => Ok(TaskStatus::Dispatched),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(FleetError::Serialization(format!("无效的任务状态: {s}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: i64,
    pub payload: TaskPayload,
    pub status: TaskStatus,
    pub retry_count: i32,
    /// 数值越大越优先
    pub priority: i32,
    /// 在此时间之前不可派发
    pub scheduled_at: Option<DateTime<Utc>>,
    pub assigned_node: Option<i64>,
    pub assigned_account: Option<i64>,
    pub account_affinity: Option<i64>,
    pub node_affinity: Option<i64>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(new_task: NewTask) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 将由仓储生成
            payload: new_task.payload,
            status: TaskStatus::Pending,
            retry_count: 0,
            priority: new_task.priority,
            scheduled_at: new_task.scheduled_at,
            assigned_node: None,
            assigned_account: None,
            account_affinity: new_task.account_affinity,
            node_affinity: new_task.node_affinity,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            dispatched_at: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.payload.kind()
    }

    pub fn parent_task_id(&self) -> Option<i64> {
        self.payload.parent_task_id()
    }

    /// 按状态机规则迁移状态，非法迁移返回错误且不修改任务
    pub fn transition_to(&mut self, next: TaskStatus) -> FleetResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(FleetError::InvalidTransition {
                task_id: self.id,
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }

        let now = Utc::now();
        match next {
            TaskStatus::Dispatched => self.dispatched_at = Some(now),
            TaskStatus::InProgress => self.started_at = Some(now),
            TaskStatus::Completed | TaskStatus::Failed => self.finished_at = Some(now),
            TaskStatus::Pending => {
                self.assigned_node = None;
                self.assigned_account = None;
                self.dispatched_at = None;
                self.started_at = None;
            }
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at.map_or(true, |at| at <= now)
    }

    pub fn entity_description(&self) -> String {
        format!(
            "任务 {} (类型: {}, 状态: {})",
            self.id,
            self.kind().as_str(),
            self.status
        )
    }
}

/// 外部协作方提交的任务创建请求
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewTask {
    pub payload: TaskPayload,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub account_affinity: Option<i64>,
    #[serde(default)]
    pub node_affinity: Option<i64>,
}

impl NewTask {
    pub fn new(payload: TaskPayload) -> Self {
        Self {
            payload,
            priority: 0,
            scheduled_at: None,
            account_affinity: None,
            node_affinity: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub kind: Option<TaskKind>,
    pub assigned_node: Option<i64>,
    pub limit: Option<usize>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        self.status.map_or(true, |s| task.status == s)
            && self.kind.map_or(true, |k| task.kind() == k)
            && self.assigned_node
                .map_or(true, |n| task.assigned_node == Some(n))
    }
}

/// 当前发布的节点程序版本
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentVersion {
    pub version: SemanticVersion,
    pub changelog: String,
    /// 安装包文件名，相对于服务端的安装包目录
    pub payload_ref: String,
    pub active: bool,
    pub published_at: DateTime<Utc>,
}
