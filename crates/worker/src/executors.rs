use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use fleet_core::{DestinationConfig, FleetError, FleetResult};
use fleet_domain::entities::{Account, Task};

/// 交给执行器的上下文：任务本身、节点绑定的账号和解析后的目标版块
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub task: Task,
    pub account: Option<Account>,
    pub destination: Option<DestinationConfig>,
}

/// 不透明的执行能力
///
/// 成功时返回平台分配的结果引用（帖子ID、评论ID等），
/// 失败时返回 [`FleetError::TaskExecution`]。
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, context: &ExecutionContext) -> FleetResult<Option<String>>;

    fn name(&self) -> &str;
}

/// 外部命令的标准输出约定
#[derive(Debug, Deserialize)]
struct CommandReport {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

/// 外部命令执行器
///
/// 上下文以 JSON 写入子进程的标准输入，子进程在标准输出的最后一行
/// 打印 `{"result": ...}` 或 `{"error": "..."}`。
pub struct ExternalCommandExecutor {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ExternalCommandExecutor {
    pub fn new(command: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            args,
            timeout,
        }
    }

    fn parse_output(stdout: &str, stderr: &str, exit_code: Option<i32>) -> FleetResult<Option<String>> {
        let report = stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .and_then(|line| serde_json::from_str::<CommandReport>(line).ok());

        match report {
            Some(CommandReport {
                error: Some(error), ..
            }) => Err(FleetError::TaskExecution(error)),
            Some(CommandReport { result, .. }) if exit_code == Some(0) => Ok(match result {
                None | Some(serde_json::Value::Null) => None,
                Some(serde_json::Value::String(s)) => Some(s),
                Some(other) => Some(other.to_string()),
            }),
            _ => {
                let detail = if stderr.trim().is_empty() {
                    "没有可解析的执行结果".to_string()
                } else {
                    stderr.trim().to_string()
                };
                Err(FleetError::TaskExecution(format!(
                    "命令执行失败 (退出码: {exit_code:?}): {detail}"
                )))
            }
        }
    }
}

#[async_trait]
impl TaskExecutor for ExternalCommandExecutor {
    async fn execute(&self, context: &ExecutionContext) -> FleetResult<Option<String>> {
        let start_time = Instant::now();
        let task_id = context.task.id;
        let input = serde_json::to_vec(context)?;

        info!(
            "执行任务: task_id={}, kind={}, command={}",
            task_id,
            context.task.kind().as_str(),
            self.command
        );

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| FleetError::TaskExecution(format!("启动执行命令失败: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            // 子进程可能不读取输入就退出
            if let Err(e) = stdin.write_all(&input).await {
                debug!("写入任务 {} 的输入失败: {}", task_id, e);
            }
            drop(stdin);
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output
                .map_err(|e| FleetError::TaskExecution(format!("等待进程结束失败: {e}")))?,
            Err(_) => {
                warn!("任务 {} 执行超时 ({:?})", task_id, self.timeout);
                return Err(FleetError::TaskExecution(format!(
                    "执行超时 ({}s)",
                    self.timeout.as_secs_f64()
                )));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let result = Self::parse_output(&stdout, &stderr, output.status.code());

        info!(
            "任务执行结束: task_id={}, success={}, duration={}ms",
            task_id,
            result.is_ok(),
            start_time.elapsed().as_millis()
        );
        result
    }

    fn name(&self) -> &str {
        "external-command"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_domain::entities::{NewTask, TaskPayload};

    fn context() -> ExecutionContext {
        let mut task = Task::new(NewTask::new(TaskPayload::Publish {
            title: "标题".to_string(),
            content: "正文".to_string(),
            destination: None,
        }));
        task.id = 5;
        ExecutionContext {
            task,
            account: None,
            destination: None,
        }
    }

    fn shell(script: &str, timeout: Duration) -> ExternalCommandExecutor {
        ExternalCommandExecutor::new("sh", vec!["-c".to_string(), script.to_string()], timeout)
    }

    #[test]
    fn test_parse_output() {
        assert_eq!(
            ExternalCommandExecutor::parse_output("log\n{\"result\":\"post-42\"}\n", "", Some(0))
                .unwrap(),
            Some("post-42".to_string())
        );
        assert_eq!(
            ExternalCommandExecutor::parse_output("{\"result\":null}", "", Some(0)).unwrap(),
            None
        );
        assert!(matches!(
            ExternalCommandExecutor::parse_output("{\"error\":\"登录失效\"}", "", Some(1)),
            Err(FleetError::TaskExecution(msg)) if msg == "登录失效"
        ));
        assert!(ExternalCommandExecutor::parse_output("", "boom", Some(2)).is_err());
    }

    #[tokio::test]
    async fn test_command_receives_task_and_returns_result() {
        let executor = shell(
            r#"grep -q '"id":5' && echo '{"result":"post-42"}'"#,
            Duration::from_secs(10),
        );
        let result = executor.execute(&context()).await.unwrap();
        assert_eq!(result.as_deref(), Some("post-42"));
    }

    #[tokio::test]
    async fn test_command_reports_error() {
        let executor = shell(
            r#"cat > /dev/null; echo '{"error":"captcha"}'; exit 1"#,
            Duration::from_secs(10),
        );
        let err = executor.execute(&context()).await.unwrap_err();
        assert!(err.to_string().contains("captcha"));
    }

    #[tokio::test]
    async fn test_command_timeout() {
        let executor = shell("sleep 5", Duration::from_millis(200));
        let err = executor.execute(&context()).await.unwrap_err();
        assert!(err.to_string().contains("超时"));
    }

    #[tokio::test]
    async fn test_missing_command() {
        let executor = ExternalCommandExecutor::new(
            "/nonexistent/fleet-action",
            Vec::new(),
            Duration::from_secs(1),
        );
        assert!(matches!(
            executor.execute(&context()).await,
            Err(FleetError::TaskExecution(_))
        ));
    }
}
