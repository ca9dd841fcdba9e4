use async_trait::async_trait;
use fleet_core::FleetResult;
use fleet_domain::{entities::AgentVersion, repositories::VersionRepository};
use sqlx::{Row, SqlitePool};
use tracing::info;

pub struct SqliteVersionRepository {
    pool: SqlitePool,
}

impl SqliteVersionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VersionRepository for SqliteVersionRepository {
    async fn current(&self) -> FleetResult<Option<AgentVersion>> {
        let row = sqlx::query(
            "SELECT * FROM agent_versions WHERE active = 1 ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let version: String = row.try_get("version")?;
                Ok(Some(AgentVersion {
                    version: version.parse()?,
                    changelog: row.try_get("changelog")?,
                    payload_ref: row.try_get("payload_ref")?,
                    active: row.try_get("active")?,
                    published_at: row.try_get("published_at")?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn publish(&self, version: &AgentVersion) -> FleetResult<AgentVersion> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE agent_versions SET active = 0 WHERE active = 1")
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO agent_versions (version, changelog, payload_ref, active, published_at)
            VALUES ($1, $2, $3, 1, $4)
            "#,
        )
        .bind(version.version.to_string())
        .bind(&version.changelog)
        .bind(&version.payload_ref)
        .bind(version.published_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!("发布节点程序版本: {}", version.version);
        let mut published = version.clone();
        published.active = true;
        Ok(published)
    }
}
