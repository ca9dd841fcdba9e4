use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use fleet_core::{DatabaseConfig, FleetResult};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use super::sqlite::{
    SqliteAccountRepository, SqliteNodeRepository, SqliteTaskRepository, SqliteVersionRepository,
};
use crate::Repositories;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS nodes (
        id INTEGER PRIMARY KEY,
        address TEXT NOT NULL,
        status TEXT NOT NULL,
        last_heartbeat TEXT,
        metrics TEXT NOT NULL,
        current_task INTEGER,
        registered_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        kind TEXT NOT NULL,
        payload TEXT NOT NULL,
        parent_task_id INTEGER,
        status TEXT NOT NULL,
        retry_count INTEGER NOT NULL DEFAULT 0,
        priority INTEGER NOT NULL DEFAULT 0,
        scheduled_at TEXT,
        assigned_node INTEGER,
        assigned_account INTEGER,
        account_affinity INTEGER,
        node_affinity INTEGER,
        result TEXT,
        error TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        dispatched_at TEXT,
        started_at TEXT,
        finished_at TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_parent ON tasks(parent_task_id)",
    r#"
    CREATE TABLE IF NOT EXISTS accounts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        credentials TEXT NOT NULL,
        assigned_node INTEGER UNIQUE,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS agent_versions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        version TEXT NOT NULL,
        changelog TEXT NOT NULL,
        payload_ref TEXT NOT NULL,
        active INTEGER NOT NULL,
        published_at TEXT NOT NULL
    )
    "#,
];

/// SQLite 连接池与表结构管理
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> FleetResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);

        // 内存库每个连接都是独立的数据库，只能使用单连接且不能回收
        let in_memory = config.url.contains(":memory:");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(config.max_connections)
        };

        let pool = pool_options
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .connect_with(options)
            .await?;

        info!("数据库连接成功: {}", config.url);
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// 创建缺失的表和索引，可重复执行
    pub async fn migrate(&self) -> FleetResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("数据库表结构已就绪");
        Ok(())
    }

    pub async fn health_check(&self) -> FleetResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn repositories(&self) -> Repositories {
        Repositories {
            nodes: Arc::new(SqliteNodeRepository::new(self.pool.clone())),
            tasks: Arc::new(SqliteTaskRepository::new(self.pool.clone())),
            accounts: Arc::new(SqliteAccountRepository::new(self.pool.clone())),
            versions: Arc::new(SqliteVersionRepository::new(self.pool.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> DatabaseConfig {
        DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 5,
            connection_timeout_seconds: 5,
        }
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let db = DatabaseManager::new(&memory_config()).await.unwrap();
        db.migrate().await.unwrap();
        db.migrate().await.unwrap();
        assert!(db.health_check().await.is_ok());
        db.close().await;
    }

    #[tokio::test]
    async fn test_file_database_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.db");
        let config = DatabaseConfig {
            url: format!("sqlite:{}", path.display()),
            ..memory_config()
        };

        let db = DatabaseManager::new(&config).await.unwrap();
        db.migrate().await.unwrap();
        db.close().await;
        assert!(path.exists());
    }
}
