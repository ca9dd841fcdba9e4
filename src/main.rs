use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use fleet_core::AppConfig;
use fleet_worker::AgentExit;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod app;
mod shutdown;

use app::{AppMode, Application};
use shutdown::ShutdownManager;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let matches = Command::new("fleet-scheduler")
        .version(env!("CARGO_PKG_VERSION"))
        .about("发布节点集群协调系统")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，缺省时查找默认位置"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式")
                .value_parser(["coordinator", "agent", "all"])
                .default_value("coordinator"),
        )
        .arg(
            Arg::new("node-id")
                .long("node-id")
                .value_name("ID")
                .help("节点ID (仅在agent模式下使用)")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，缺省使用配置文件中的值")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，缺省使用配置文件中的值")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let mode_str = matches
        .get_one::<String>("mode")
        .map(String::as_str)
        .unwrap_or("coordinator");
    let node_id = matches.get_one::<i64>("node-id").copied();

    // 加载配置
    let mut config = AppConfig::load(config_path)
        .with_context(|| format!("加载配置失败: {}", config_path.unwrap_or("<默认>")))?;

    let log_level = matches
        .get_one::<String>("log-level")
        .cloned()
        .unwrap_or_else(|| config.observability.log_level.clone());
    let log_format = matches
        .get_one::<String>("log-format")
        .cloned()
        .unwrap_or_else(|| config.observability.log_format.clone());

    // 初始化日志系统
    init_logging(&log_level, &log_format)?;

    info!("启动发布节点集群协调系统");
    info!("运行模式: {mode_str}");

    // 命令行指定的节点ID覆盖配置
    if let Some(id) = node_id {
        info!("节点ID: {}", id);
        config.worker.node_id = id;
    }

    let app_mode = parse_app_mode(mode_str, &mut config)?;
    config.validate().context("配置校验失败")?;

    let app = Arc::new(Application::new(config, app_mode));
    let shutdown_manager = ShutdownManager::new();

    let mut app_handle = {
        let shutdown_rx = shutdown_manager.subscribe().await;
        let app = Arc::clone(&app);
        tokio::spawn(async move { app.run(shutdown_rx).await })
    };

    let finished = tokio::select! {
        _ = wait_for_shutdown_signal() => None,
        result = &mut app_handle => Some(result),
    };

    match finished {
        None => {
            info!("收到关闭信号，开始优雅关闭...");
            shutdown_manager.shutdown().await;

            match tokio::time::timeout(SHUTDOWN_TIMEOUT, app_handle).await {
                Ok(Ok(Ok(_))) => info!("应用已优雅关闭"),
                Ok(Ok(Err(e))) => error!("应用关闭时发生错误: {e:#}"),
                Ok(Err(e)) => error!("应用任务异常退出: {e}"),
                Err(_) => warn!("应用关闭超时，强制退出"),
            }
        }
        // 应用自行结束：节点代理完成自更新或被服务端要求关闭
        Some(result) => {
            match result {
                Ok(Ok(Some(AgentExit::Relaunched { version }))) => {
                    info!("节点代理已切换到新版本 {}，旧进程退出", version);
                }
                Ok(Ok(_)) => info!("应用已退出"),
                Ok(Err(e)) => {
                    error!("应用运行失败: {e:#}");
                    return Err(e);
                }
                Err(e) => error!("应用任务异常退出: {e}"),
            }
            if !shutdown_manager.is_shutdown().await {
                shutdown_manager.shutdown().await;
            }
        }
    }

    info!("发布节点集群协调系统已退出");
    Ok(())
}

/// 初始化日志系统，RUST_LOG 优先于配置的日志级别
fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

/// 解析应用运行模式，并打开所选模式需要的组件
fn parse_app_mode(mode_str: &str, config: &mut AppConfig) -> Result<AppMode> {
    match mode_str {
        "coordinator" => Ok(AppMode::Coordinator),
        "agent" => {
            config.worker.enabled = true;
            Ok(AppMode::Agent)
        }
        "all" => Ok(AppMode::All),
        _ => Err(anyhow::anyhow!("不支持的运行模式: {mode_str}")),
    }
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
