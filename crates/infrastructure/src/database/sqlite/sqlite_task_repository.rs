use async_trait::async_trait;
use fleet_core::{FleetError, FleetResult};
use fleet_domain::{
    entities::{Task, TaskFilter, TaskStatus},
    repositories::TaskRepository,
};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::debug;

pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> FleetResult<Task> {
        let payload: String = row.try_get("payload")?;
        let status: String = row.try_get("status")?;

        Ok(Task {
            id: row.try_get("id")?,
            payload: serde_json::from_str(&payload)?,
            status: status.parse()?,
            retry_count: row.try_get("retry_count")?,
            priority: row.try_get("priority")?,
            scheduled_at: row.try_get("scheduled_at")?,
            assigned_node: row.try_get("assigned_node")?,
            assigned_account: row.try_get("assigned_account")?,
            account_affinity: row.try_get("account_affinity")?,
            node_affinity: row.try_get("node_affinity")?,
            result: row.try_get("result")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            dispatched_at: row.try_get("dispatched_at")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn create(&self, task: &Task) -> FleetResult<Task> {
        let payload = serde_json::to_string(&task.payload)?;

        let result = sqlx::query(
            r#"
            INSERT INTO tasks (
                kind, payload, parent_task_id, status, retry_count, priority, scheduled_at,
                assigned_node, assigned_account, account_affinity, node_affinity,
                result, error, created_at, updated_at, dispatched_at, started_at, finished_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(task.kind().as_str())
        .bind(payload)
        .bind(task.parent_task_id())
        .bind(task.status.as_str())
        .bind(task.retry_count)
        .bind(task.priority)
        .bind(task.scheduled_at)
        .bind(task.assigned_node)
        .bind(task.assigned_account)
        .bind(task.account_affinity)
        .bind(task.node_affinity)
        .bind(&task.result)
        .bind(&task.error)
        .bind(task.created_at)
        .bind(task.updated_at)
        .bind(task.dispatched_at)
        .bind(task.started_at)
        .bind(task.finished_at)
        .execute(&self.pool)
        .await?;

        let mut created = task.clone();
        created.id = result.last_insert_rowid();
        debug!("创建任务成功: {}", created.entity_description());
        Ok(created)
    }

    async fn find_by_id(&self, id: i64) -> FleetResult<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn find_by_status(&self, status: TaskStatus) -> FleetResult<Vec<Task>> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE status = $1 ORDER BY id ASC")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_task).collect()
    }

    async fn find_children(&self, parent_id: i64) -> FleetResult<Vec<Task>> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE parent_task_id = $1 ORDER BY id ASC")
            .bind(parent_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_task).collect()
    }

    async fn list(&self, filter: &TaskFilter) -> FleetResult<Vec<Task>> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM tasks WHERE 1 = 1");

        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(kind) = filter.kind {
            builder.push(" AND kind = ").push_bind(kind.as_str());
        }
        if let Some(node_id) = filter.assigned_node {
            builder.push(" AND assigned_node = ").push_bind(node_id);
        }
        builder.push(" ORDER BY id ASC");
        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn update(&self, task: &Task) -> FleetResult<Task> {
        let payload = serde_json::to_string(&task.payload)?;

        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET payload = $2, status = $3, retry_count = $4, priority = $5, scheduled_at = $6,
                assigned_node = $7, assigned_account = $8, result = $9, error = $10,
                updated_at = $11, dispatched_at = $12, started_at = $13, finished_at = $14
            WHERE id = $1
            "#,
        )
        .bind(task.id)
        .bind(payload)
        .bind(task.status.as_str())
        .bind(task.retry_count)
        .bind(task.priority)
        .bind(task.scheduled_at)
        .bind(task.assigned_node)
        .bind(task.assigned_account)
        .bind(&task.result)
        .bind(&task.error)
        .bind(task.updated_at)
        .bind(task.dispatched_at)
        .bind(task.started_at)
        .bind(task.finished_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(FleetError::TaskNotFound { id: task.id });
        }

        Ok(task.clone())
    }
}
