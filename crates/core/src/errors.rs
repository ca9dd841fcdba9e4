use thiserror::Error;

/// 协调系统错误类型定义
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("任务未找到: {id}")]
    TaskNotFound { id: i64 },

    #[error("节点未找到: {id}")]
    NodeNotFound { id: i64 },

    #[error("账号未找到: {id}")]
    AccountNotFound { id: i64 },

    #[error("节点 {id} 不可用（离线或忙碌）")]
    NodeUnavailable { id: i64 },

    #[error("无效的状态转换: 任务 {task_id} 从 {from} 到 {to}")]
    InvalidTransition {
        task_id: i64,
        from: String,
        to: String,
    },

    #[error("任务 {task_id} 的依赖未满足: {reason}")]
    DependencyNotSatisfied { task_id: i64, reason: String },

    #[error("账号冲突: {0}")]
    AccountConflict(String),

    #[error("节点 {node_id} 会话不可用")]
    SessionUnavailable { node_id: i64 },

    #[error("网络错误: {0}")]
    Network(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("无效的版本号: {0}")]
    InvalidVersion(String),

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("无效的任务参数: {0}")]
    InvalidTaskParams(String),

    #[error("版本更新失败: {0}")]
    Update(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl FleetError {
    /// 是否为可自动恢复的瞬时错误（网络抖动、会话断开等）
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FleetError::Network(_) | FleetError::SessionUnavailable { .. }
        )
    }
}

impl From<serde_json::Error> for FleetError {
    fn from(e: serde_json::Error) -> Self {
        FleetError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for FleetError {
    fn from(e: std::io::Error) -> Self {
        FleetError::Internal(format!("IO错误: {e}"))
    }
}

/// 统一的Result类型
pub type FleetResult<T> = std::result::Result<T, FleetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FleetError::TaskNotFound { id: 42 };
        assert_eq!(err.to_string(), "任务未找到: 42");

        let err = FleetError::InvalidTransition {
            task_id: 7,
            from: "completed".to_string(),
            to: "dispatched".to_string(),
        };
        assert!(err.to_string().contains("completed"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(FleetError::Network("timeout".to_string()).is_transient());
        assert!(FleetError::SessionUnavailable { node_id: 1 }.is_transient());
        assert!(!FleetError::TaskNotFound { id: 1 }.is_transient());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: FleetError = json_err.into();
        assert!(matches!(err, FleetError::Serialization(_)));
    }
}
