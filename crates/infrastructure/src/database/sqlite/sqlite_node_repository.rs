use async_trait::async_trait;
use fleet_core::{FleetError, FleetResult};
use fleet_domain::{entities::WorkerNode, repositories::NodeRepository};
use sqlx::{Row, SqlitePool};
use tracing::debug;

pub struct SqliteNodeRepository {
    pool: SqlitePool,
}

impl SqliteNodeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_node(row: &sqlx::sqlite::SqliteRow) -> FleetResult<WorkerNode> {
        let status: String = row.try_get("status")?;
        let metrics: String = row.try_get("metrics")?;

        Ok(WorkerNode {
            id: row.try_get("id")?,
            address: row.try_get("address")?,
            status: status.parse()?,
            last_heartbeat: row.try_get("last_heartbeat")?,
            metrics: serde_json::from_str(&metrics)?,
            current_task: row.try_get("current_task")?,
            registered_at: row.try_get("registered_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl NodeRepository for SqliteNodeRepository {
    async fn register(&self, node: &WorkerNode) -> FleetResult<WorkerNode> {
        let metrics = serde_json::to_string(&node.metrics)?;

        sqlx::query(
            r#"
            INSERT INTO nodes (id, address, status, last_heartbeat, metrics, current_task, registered_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT(id) DO UPDATE SET
                address = excluded.address,
                status = excluded.status,
                last_heartbeat = excluded.last_heartbeat,
                metrics = excluded.metrics,
                current_task = excluded.current_task,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(node.id)
        .bind(&node.address)
        .bind(node.status.as_str())
        .bind(node.last_heartbeat)
        .bind(metrics)
        .bind(node.current_task)
        .bind(node.registered_at)
        .bind(node.updated_at)
        .execute(&self.pool)
        .await?;

        debug!("注册节点成功: {}", node.id);
        Ok(node.clone())
    }

    async fn find_by_id(&self, id: i64) -> FleetResult<Option<WorkerNode>> {
        let row = sqlx::query("SELECT * FROM nodes WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_node).transpose()
    }

    async fn find_all(&self) -> FleetResult<Vec<WorkerNode>> {
        let rows = sqlx::query("SELECT * FROM nodes ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_node).collect()
    }

    async fn update(&self, node: &WorkerNode) -> FleetResult<WorkerNode> {
        let metrics = serde_json::to_string(&node.metrics)?;

        let result = sqlx::query(
            r#"
            UPDATE nodes
            SET address = $2, status = $3, last_heartbeat = $4, metrics = $5,
                current_task = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(node.id)
        .bind(&node.address)
        .bind(node.status.as_str())
        .bind(node.last_heartbeat)
        .bind(metrics)
        .bind(node.current_task)
        .bind(node.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(FleetError::NodeNotFound { id: node.id });
        }

        Ok(node.clone())
    }
}
