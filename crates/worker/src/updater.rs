//! 节点自更新
//!
//! 服务端版本更高时下载安装包，先备份当前文件再替换，
//! 然后以相同参数重新启动，由调用方结束旧进程。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use fleet_core::{FleetError, FleetResult};
use fleet_domain::value_objects::SemanticVersion;

use crate::components::CoordinatorApi;

/// 以相同参数重新启动替换后的可执行文件
pub trait ProcessRelauncher: Send + Sync {
    fn relaunch(&self, executable: &Path) -> FleetResult<()>;
}

/// 启动新进程并沿用当前的命令行参数
#[derive(Debug, Default, Clone, Copy)]
pub struct ExecRelauncher;

impl ProcessRelauncher for ExecRelauncher {
    fn relaunch(&self, executable: &Path) -> FleetResult<()> {
        let args: Vec<String> = std::env::args().skip(1).collect();
        std::process::Command::new(executable)
            .args(&args)
            .spawn()
            .map_err(|e| FleetError::Update(format!("重新启动失败: {e}")))?;
        info!("已启动新版本进程: {} {:?}", executable.display(), args);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// 本地版本不低于服务端，或服务端尚未发布版本
    UpToDate {
        local: SemanticVersion,
        remote: Option<SemanticVersion>,
    },
    /// 已替换并重新启动，旧进程应当退出
    Updated {
        from: SemanticVersion,
        to: SemanticVersion,
    },
}

pub struct Updater {
    api: Arc<dyn CoordinatorApi>,
    current: SemanticVersion,
    install_path: PathBuf,
    relauncher: Arc<dyn ProcessRelauncher>,
}

impl Updater {
    pub fn new(
        api: Arc<dyn CoordinatorApi>,
        current: SemanticVersion,
        install_path: PathBuf,
        relauncher: Arc<dyn ProcessRelauncher>,
    ) -> Self {
        Self {
            api,
            current,
            install_path,
            relauncher,
        }
    }

    pub fn current_version(&self) -> SemanticVersion {
        self.current
    }

    pub fn backup_path(&self) -> PathBuf {
        sibling_with_suffix(&self.install_path, "bak")
    }

    pub async fn check_and_update(&self) -> FleetResult<UpdateOutcome> {
        let Some(remote) = self.api.get_current_version().await? else {
            info!("服务端尚未发布版本，跳过更新检查");
            return Ok(UpdateOutcome::UpToDate {
                local: self.current,
                remote: None,
            });
        };

        if !remote.version.is_newer_than(&self.current) {
            info!(
                "当前版本 {} 已是最新 (服务端: {})",
                self.current, remote.version
            );
            return Ok(UpdateOutcome::UpToDate {
                local: self.current,
                remote: Some(remote.version),
            });
        }

        info!(
            "发现新版本 {} (当前: {})，开始更新: {}",
            remote.version, self.current, remote.changelog
        );

        let payload = self.api.download_payload().await?;
        if payload.is_empty() {
            return Err(FleetError::Update("下载的安装包为空".to_string()));
        }

        self.install(&payload).await?;
        self.relauncher.relaunch(&self.install_path)?;

        Ok(UpdateOutcome::Updated {
            from: self.current,
            to: remote.version,
        })
    }

    /// 先备份再替换，替换通过同目录临时文件加重命名完成
    async fn install(&self, payload: &[u8]) -> FleetResult<()> {
        let backup = self.backup_path();
        let staging = sibling_with_suffix(&self.install_path, "new");

        let permissions = match tokio::fs::metadata(&self.install_path).await {
            Ok(metadata) => {
                tokio::fs::copy(&self.install_path, &backup)
                    .await
                    .map_err(|e| FleetError::Update(format!("备份当前版本失败: {e}")))?;
                info!("已备份当前版本到 {}", backup.display());
                Some(metadata.permissions())
            }
            Err(e) => {
                warn!(
                    "当前安装文件 {} 不可读，跳过备份: {}",
                    self.install_path.display(),
                    e
                );
                None
            }
        };

        tokio::fs::write(&staging, payload)
            .await
            .map_err(|e| FleetError::Update(format!("写入新版本失败: {e}")))?;
        if let Some(permissions) = permissions {
            tokio::fs::set_permissions(&staging, permissions)
                .await
                .map_err(|e| FleetError::Update(format!("设置文件权限失败: {e}")))?;
        }

        if let Err(e) = tokio::fs::rename(&staging, &self.install_path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(FleetError::Update(format!("替换可执行文件失败: {e}")));
        }

        info!("新版本已写入 {}", self.install_path.display());
        Ok(())
    }
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}
