use async_trait::async_trait;
use fleet_core::{FleetError, FleetResult};
use fleet_domain::{entities::Account, repositories::AccountRepository};
use sqlx::{Row, SqlitePool};
use tracing::debug;

pub struct SqliteAccountRepository {
    pool: SqlitePool,
}

impl SqliteAccountRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_account(row: &sqlx::sqlite::SqliteRow) -> FleetResult<Account> {
        let status: String = row.try_get("status")?;
        let credentials: String = row.try_get("credentials")?;

        Ok(Account {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            credentials: serde_json::from_str(&credentials)?,
            assigned_node: row.try_get("assigned_node")?,
            status: status.parse()?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl AccountRepository for SqliteAccountRepository {
    async fn create(&self, account: &Account) -> FleetResult<Account> {
        let credentials = serde_json::to_string(&account.credentials)?;

        let result = sqlx::query(
            r#"
            INSERT INTO accounts (name, credentials, assigned_node, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&account.name)
        .bind(credentials)
        .bind(account.assigned_node)
        .bind(account.status.as_str())
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await?;

        let mut created = account.clone();
        created.id = result.last_insert_rowid();
        debug!("创建账号成功: {} (ID: {})", created.name, created.id);
        Ok(created)
    }

    async fn find_by_id(&self, id: i64) -> FleetResult<Option<Account>> {
        let row = sqlx::query("SELECT * FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_account).transpose()
    }

    async fn find_by_node(&self, node_id: i64) -> FleetResult<Option<Account>> {
        let row = sqlx::query("SELECT * FROM accounts WHERE assigned_node = $1")
            .bind(node_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_account).transpose()
    }

    async fn find_all(&self) -> FleetResult<Vec<Account>> {
        let rows = sqlx::query("SELECT * FROM accounts ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_account).collect()
    }

    async fn update(&self, account: &Account) -> FleetResult<Account> {
        let credentials = serde_json::to_string(&account.credentials)?;

        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET name = $2, credentials = $3, assigned_node = $4, status = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(account.id)
        .bind(&account.name)
        .bind(credentials)
        .bind(account.assigned_node)
        .bind(account.status.as_str())
        .bind(account.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(FleetError::AccountNotFound { id: account.id });
        }

        Ok(account.clone())
    }
}
