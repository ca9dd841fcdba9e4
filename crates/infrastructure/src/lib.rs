pub mod database;
pub mod memory;
pub mod observability;

use std::sync::Arc;

use fleet_core::{DatabaseConfig, FleetResult};
use fleet_domain::repositories::{
    AccountRepository, NodeRepository, TaskRepository, VersionRepository,
};
use tracing::info;

pub use database::*;
pub use memory::*;
pub use observability::*;

/// 一组共享的仓储实例
#[derive(Clone)]
pub struct Repositories {
    pub nodes: Arc<dyn NodeRepository>,
    pub tasks: Arc<dyn TaskRepository>,
    pub accounts: Arc<dyn AccountRepository>,
    pub versions: Arc<dyn VersionRepository>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            nodes: Arc::new(InMemoryNodeRepository::new()),
            tasks: Arc::new(InMemoryTaskRepository::new()),
            accounts: Arc::new(InMemoryAccountRepository::new()),
            versions: Arc::new(InMemoryVersionRepository::new()),
        }
    }

    /// 按数据库URL选择存储：`memory://` 使用内存，其余走 SQLite 并执行建表
    pub async fn connect(config: &DatabaseConfig) -> FleetResult<(Self, Option<DatabaseManager>)> {
        if config.is_in_memory() {
            info!("使用内存存储");
            return Ok((Self::in_memory(), None));
        }

        let db = DatabaseManager::new(config).await?;
        db.migrate().await?;
        Ok((db.repositories(), Some(db)))
    }
}
