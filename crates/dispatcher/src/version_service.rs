use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use fleet_core::{FleetError, FleetResult};
use fleet_domain::{
    entities::AgentVersion, repositories::VersionRepository, value_objects::SemanticVersion,
};

/// 节点程序版本发布
pub struct VersionService {
    versions: Arc<dyn VersionRepository>,
    payload_dir: PathBuf,
}

impl VersionService {
    pub fn new(versions: Arc<dyn VersionRepository>, payload_dir: impl Into<PathBuf>) -> Self {
        Self {
            versions,
            payload_dir: payload_dir.into(),
        }
    }

    pub async fn current_version(&self) -> FleetResult<Option<AgentVersion>> {
        self.versions.current().await
    }

    /// 发布新版本，版本号必须严格高于当前版本
    pub async fn publish(
        &self,
        version: &str,
        changelog: String,
        payload_ref: String,
    ) -> FleetResult<AgentVersion> {
        let version: SemanticVersion = version.parse()?;
        validate_payload_ref(&payload_ref)?;

        if let Some(current) = self.versions.current().await? {
            if !version.is_newer_than(&current.version) {
                return Err(FleetError::InvalidVersion(format!(
                    "新版本 {} 必须高于当前版本 {}",
                    version, current.version
                )));
            }
        }

        let published = self
            .versions
            .publish(&AgentVersion {
                version,
                changelog,
                payload_ref,
                active: true,
                published_at: Utc::now(),
            })
            .await?;

        info!("发布节点程序新版本: {}", published.version);
        Ok(published)
    }

    /// 当前版本安装包的本地路径
    pub async fn current_payload_path(&self) -> FleetResult<Option<PathBuf>> {
        Ok(self
            .versions
            .current()
            .await?
            .map(|v| self.payload_dir.join(&v.payload_ref)))
    }

    /// 安装包引用对应的本地路径，引用不合法时不会拼接路径
    pub fn payload_path(&self, payload_ref: &str) -> FleetResult<PathBuf> {
        validate_payload_ref(payload_ref)?;
        Ok(self.payload_dir.join(payload_ref))
    }
}

/// 安装包引用只能是目录内的文件名
fn validate_payload_ref(payload_ref: &str) -> FleetResult<()> {
    let invalid = payload_ref.is_empty()
        || payload_ref.contains('/')
        || payload_ref.contains('\\')
        || payload_ref == "."
        || payload_ref == "..";

    if invalid {
        return Err(FleetError::InvalidTaskParams(format!(
            "无效的安装包引用: {payload_ref}"
        )));
    }
    Ok(())
}
