use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::{
    api_observability::{ApiConfig, DestinationConfig, ObservabilityConfig},
    database::DatabaseConfig,
    dispatcher_worker::{DispatcherConfig, WorkerConfig},
};

/// 系统配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub dispatcher: DispatcherConfig,
    pub worker: WorkerConfig,
    pub api: ApiConfig,
    pub observability: ObservabilityConfig,
    /// 目标名称 -> 目标元数据
    #[serde(default)]
    pub destinations: HashMap<String, DestinationConfig>,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// `config_path` 为 None 时依次尝试默认路径，都不存在则只使用默认值。
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults =
            ConfigBuilder::try_from(&AppConfig::default()).context("生成默认配置失败")?;
        let mut builder = ConfigBuilder::builder().add_source(defaults);

        match config_path {
            Some(path) => {
                if !Path::new(path).exists() {
                    return Err(anyhow::anyhow!("配置文件不存在: {}", path));
                }
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
            None => {
                let default_paths = ["config/fleet.toml", "fleet.toml", "/etc/fleet/config.toml"];
                if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("FLEET")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// 从TOML字符串加载配置
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// 序列化为TOML字符串
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;

        self.dispatcher
            .validate()
            .context("Dispatcher配置验证失败")?;

        if self.worker.enabled {
            self.worker.validate().context("Worker配置验证失败")?;
        }

        self.api.validate().context("API配置验证失败")?;

        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        for (name, destination) in &self.destinations {
            if destination.section_id.is_empty() {
                return Err(anyhow::anyhow!("目标 {} 的 section_id 不能为空", name));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeSelection;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dispatcher.max_retries, 3);
        assert_eq!(
            config.dispatcher.offline_threshold(),
            Duration::from_secs(30)
        );
        assert_eq!(config.worker.ack_retry_policy().max_attempts, Some(10));
        assert!(!config.dispatcher.shutdown_notify_nodes);
    }

    #[test]
    fn test_shutdown_notify_is_opt_in() {
        let config = AppConfig::from_toml(
            r#"
            [dispatcher]
            shutdown_notify_nodes = true
            "#,
        )
        .unwrap();
        assert!(config.dispatcher.shutdown_notify_nodes);
        assert_eq!(config.dispatcher.max_retries, 3);
    }

    #[test]
    fn test_offline_threshold_must_exceed_dispatch_interval() {
        let mut config = AppConfig::default();
        config.dispatcher.heartbeat_interval_seconds = 1;
        config.dispatcher.missed_heartbeats = 1;
        config.dispatcher.dispatch_interval_ms = 5000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip_and_overrides() {
        let toml_str = r#"
            [database]
            url = "sqlite::memory:"
            max_connections = 2
            connection_timeout_seconds = 5

            [dispatcher]
            enabled = true
            dispatch_interval_ms = 500
            heartbeat_interval_seconds = 10
            missed_heartbeats = 3
            sweep_interval_seconds = 5
            max_retries = 5
            reconnect_grace_seconds = 20
            node_selection = "round_robin"
            session_buffer = 16

            [worker]
            enabled = true
            node_id = 3
            server_url = "https://fleet.example.com"
            agent_version = "1.0.2"
            heartbeat_interval_seconds = 10
            ack_retry_interval_seconds = 30
            ack_max_attempts = 10
            reconnect_base_ms = 500
            reconnect_max_ms = 10000
            reconnect_max_attempts = 0
            executor_command = "node"
            executor_args = ["action.js"]
            execution_timeout_seconds = 120
            shutdown_grace_seconds = 30

            [api]
            enabled = true
            bind_address = "127.0.0.1:8080"
            payload_dir = "/tmp/payloads"
            request_timeout_seconds = 30

            [observability]
            log_level = "debug"
            log_format = "json"
            metrics_enabled = false
            metrics_bind_address = "127.0.0.1:9090"

            [destinations.tech]
            section_id = "42"
            display_name = "技术区"
        "#;

        let config = AppConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.dispatcher.node_selection, NodeSelection::RoundRobin);
        assert_eq!(config.worker.node_id, 3);
        assert_eq!(
            config.worker.session_endpoint(),
            "wss://fleet.example.com/ws/nodes/3"
        );
        assert_eq!(config.destinations["tech"].section_id, "42");

        let serialized = config.to_toml().unwrap();
        let reparsed = AppConfig::from_toml(&serialized).unwrap();
        assert_eq!(reparsed.dispatcher.max_retries, 5);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
            [dispatcher]
            max_retries = 7
            "#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.dispatcher.max_retries, 7);
        // 未在文件中出现的字段保留默认值
        assert_eq!(config.dispatcher.heartbeat_interval_seconds, 10);
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(AppConfig::load(Some("/nonexistent/fleet.toml")).is_err());
    }
}
