//! 内存仓储实现，用于默认部署和测试

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use fleet_core::{FleetError, FleetResult};
use fleet_domain::{
    entities::{Account, AgentVersion, Task, TaskFilter, TaskStatus, WorkerNode},
    repositories::{AccountRepository, NodeRepository, TaskRepository, VersionRepository},
};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryNodeRepository {
    nodes: RwLock<BTreeMap<i64, WorkerNode>>,
}

impl InMemoryNodeRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NodeRepository for InMemoryNodeRepository {
    async fn register(&self, node: &WorkerNode) -> FleetResult<WorkerNode> {
        self.nodes.write().await.insert(node.id, node.clone());
        Ok(node.clone())
    }

    async fn find_by_id(&self, id: i64) -> FleetResult<Option<WorkerNode>> {
        Ok(self.nodes.read().await.get(&id).cloned())
    }

    async fn find_all(&self) -> FleetResult<Vec<WorkerNode>> {
        Ok(self.nodes.read().await.values().cloned().collect())
    }

    async fn update(&self, node: &WorkerNode) -> FleetResult<WorkerNode> {
        let mut nodes = self.nodes.write().await;
        match nodes.get_mut(&node.id) {
            Some(existing) => {
                *existing = node.clone();
                Ok(node.clone())
            }
            None => Err(FleetError::NodeNotFound { id: node.id }),
        }
    }
}

pub struct InMemoryTaskRepository {
    tasks: RwLock<BTreeMap<i64, Task>>,
    next_id: AtomicI64,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

impl Default for InMemoryTaskRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn create(&self, task: &Task) -> FleetResult<Task> {
        let mut created = task.clone();
        created.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.tasks.write().await.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: i64) -> FleetResult<Option<Task>> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn find_by_status(&self, status: TaskStatus) -> FleetResult<Vec<Task>> {
        Ok(self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect())
    }

    async fn find_children(&self, parent_id: i64) -> FleetResult<Vec<Task>> {
        Ok(self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.parent_task_id() == Some(parent_id))
            .cloned()
            .collect())
    }

    async fn list(&self, filter: &TaskFilter) -> FleetResult<Vec<Task>> {
        let tasks = self.tasks.read().await;
        let matching = tasks.values().filter(|t| filter.matches(t)).cloned();
        Ok(match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    async fn update(&self, task: &Task) -> FleetResult<Task> {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(&task.id) {
            Some(existing) => {
                *existing = task.clone();
                Ok(task.clone())
            }
            None => Err(FleetError::TaskNotFound { id: task.id }),
        }
    }
}

pub struct InMemoryAccountRepository {
    accounts: RwLock<BTreeMap<i64, Account>>,
    next_id: AtomicI64,
}

impl InMemoryAccountRepository {
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

impl Default for InMemoryAccountRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountRepository for InMemoryAccountRepository {
    async fn create(&self, account: &Account) -> FleetResult<Account> {
        let mut created = account.clone();
        created.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.accounts
            .write()
            .await
            .insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: i64) -> FleetResult<Option<Account>> {
        Ok(self.accounts.read().await.get(&id).cloned())
    }

    async fn find_by_node(&self, node_id: i64) -> FleetResult<Option<Account>> {
        Ok(self
            .accounts
            .read()
            .await
            .values()
            .find(|a| a.assigned_node == Some(node_id))
            .cloned())
    }

    async fn find_all(&self) -> FleetResult<Vec<Account>> {
        Ok(self.accounts.read().await.values().cloned().collect())
    }

    async fn update(&self, account: &Account) -> FleetResult<Account> {
        let mut accounts = self.accounts.write().await;
        match accounts.get_mut(&account.id) {
            Some(existing) => {
                *existing = account.clone();
                Ok(account.clone())
            }
            None => Err(FleetError::AccountNotFound { id: account.id }),
        }
    }
}

#[derive(Default)]
pub struct InMemoryVersionRepository {
    current: RwLock<Option<AgentVersion>>,
}

impl InMemoryVersionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VersionRepository for InMemoryVersionRepository {
    async fn current(&self) -> FleetResult<Option<AgentVersion>> {
        Ok(self.current.read().await.clone())
    }

    async fn publish(&self, version: &AgentVersion) -> FleetResult<AgentVersion> {
        let mut published = version.clone();
        published.active = true;
        *self.current.write().await = Some(published.clone());
        Ok(published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_domain::entities::{NewTask, TaskPayload};

    fn reply(parent: i64) -> Task {
        Task::new(NewTask::new(TaskPayload::Reply {
            parent_task_id: parent,
            content: "同意".to_string(),
            parent_result: None,
        }))
    }

    #[tokio::test]
    async fn test_task_ids_are_sequential() {
        let repo = InMemoryTaskRepository::new();
        let a = repo.create(&reply(9)).await.unwrap();
        let b = repo.create(&reply(9)).await.unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(repo.find_children(9).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_update_missing_task_fails() {
        let repo = InMemoryTaskRepository::new();
        let mut task = reply(1);
        task.id = 99;
        assert!(matches!(
            repo.update(&task).await,
            Err(FleetError::TaskNotFound { id: 99 })
        ));
    }

    #[tokio::test]
    async fn test_find_account_by_node() {
        let repo = InMemoryAccountRepository::new();
        let mut account = repo
            .create(&Account::new("acc-1", serde_json::json!({})))
            .await
            .unwrap();
        assert!(repo.find_by_node(3).await.unwrap().is_none());

        account.assigned_node = Some(3);
        repo.update(&account).await.unwrap();
        assert_eq!(repo.find_by_node(3).await.unwrap().unwrap().id, account.id);
    }
}
