//! 会话通道与完成确认通道的线上消息
//!
//! 会话消息是带 `type` 判别字段的 JSON，尽力而为；
//! 完成确认是按 task_id 寻址的请求/响应，是终态迁移的唯一依据。

use serde::{Deserialize, Serialize};

use crate::entities::{NodeMetrics, Task, TaskStatus};

/// 服务端发往节点的消息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    NewTask { task: Task },
    Shutdown,
}

/// 节点发往服务端的消息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeMessage {
    Heartbeat {
        #[serde(default)]
        metrics: NodeMetrics,
    },
    TaskStarted {
        id: i64,
    },
    TaskCompleted {
        id: i64,
        #[serde(default)]
        result: Option<String>,
    },
    TaskFailed {
        id: i64,
        error: String,
    },
}

impl NodeMessage {
    pub fn message_type(&self) -> &'static str {
        match self {
            NodeMessage::Heartbeat { .. } => "HEARTBEAT",
            NodeMessage::TaskStarted { .. } => "TASK_STARTED",
            NodeMessage::TaskCompleted { .. } => "TASK_COMPLETED",
            NodeMessage::TaskFailed { .. } => "TASK_FAILED",
        }
    }
}

/// 任务执行结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Success {
        #[serde(default)]
        result: Option<String>,
    },
    Failure {
        error: String,
    },
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success { .. })
    }
}

/// 完成确认请求体
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionReport {
    pub node_id: i64,
    pub outcome: TaskOutcome,
}

/// 完成确认响应
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionAck {
    pub accepted: bool,
    /// 任务已处于终态或报告已过期时为 true，此时不做任何修改
    pub duplicate: bool,
    pub status: TaskStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_message_wire_format() {
        let msg: NodeMessage = serde_json::from_value(json!({
            "type": "TASK_COMPLETED",
            "id": 7,
            "result": "post-42"
        }))
        .unwrap();
        assert_eq!(
            msg,
            NodeMessage::TaskCompleted {
                id: 7,
                result: Some("post-42".to_string())
            }
        );

        let heartbeat: NodeMessage =
            serde_json::from_value(json!({"type": "HEARTBEAT"})).unwrap();
        assert_eq!(heartbeat.message_type(), "HEARTBEAT");
    }

    #[test]
    fn test_server_message_wire_format() {
        let value = serde_json::to_value(ServerMessage::Shutdown).unwrap();
        assert_eq!(value, json!({"type": "SHUTDOWN"}));
    }

    #[test]
    fn test_unknown_message_type_rejected() {
        let result = serde_json::from_value::<NodeMessage>(json!({"type": "BOGUS"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_completion_report_body() {
        let report: CompletionReport = serde_json::from_value(json!({
            "node_id": 1,
            "outcome": {"status": "failure", "error": "登录失败"}
        }))
        .unwrap();
        assert!(!report.outcome.is_success());
    }
}
