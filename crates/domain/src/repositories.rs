//! 领域仓储抽象
//!
//! 定义数据访问的抽象接口，状态迁移规则由调度层的状态机负责，仓储只负责存取

use async_trait::async_trait;
use fleet_core::FleetResult;

use crate::entities::{Account, AgentVersion, Task, TaskFilter, TaskStatus, WorkerNode};

/// 节点仓储抽象
#[async_trait]
pub trait NodeRepository: Send + Sync {
    /// 注册节点，已存在时覆盖
    async fn register(&self, node: &WorkerNode) -> FleetResult<WorkerNode>;
    async fn find_by_id(&self, id: i64) -> FleetResult<Option<WorkerNode>>;
    async fn find_all(&self) -> FleetResult<Vec<WorkerNode>>;
    async fn update(&self, node: &WorkerNode) -> FleetResult<WorkerNode>;
}

/// 任务仓储抽象
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 创建任务并分配ID
    async fn create(&self, task: &Task) -> FleetResult<Task>;
    async fn find_by_id(&self, id: i64) -> FleetResult<Option<Task>>;
    async fn find_by_status(&self, status: TaskStatus) -> FleetResult<Vec<Task>>;
    /// 以指定任务为父任务的回复任务
    async fn find_children(&self, parent_id: i64) -> FleetResult<Vec<Task>>;
    /// 按ID升序返回
    async fn list(&self, filter: &TaskFilter) -> FleetResult<Vec<Task>>;
    async fn update(&self, task: &Task) -> FleetResult<Task>;
}

/// 账号仓储抽象
#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn create(&self, account: &Account) -> FleetResult<Account>;
    async fn find_by_id(&self, id: i64) -> FleetResult<Option<Account>>;
    async fn find_by_node(&self, node_id: i64) -> FleetResult<Option<Account>>;
    async fn find_all(&self) -> FleetResult<Vec<Account>>;
    async fn update(&self, account: &Account) -> FleetResult<Account>;
}

/// 节点程序版本仓储抽象
#[async_trait]
pub trait VersionRepository: Send + Sync {
    /// 当前生效的版本
    async fn current(&self) -> FleetResult<Option<AgentVersion>>;
    /// 发布新版本，之前的版本失效
    async fn publish(&self, version: &AgentVersion) -> FleetResult<AgentVersion>;
}
