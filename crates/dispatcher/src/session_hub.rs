//! 节点会话注册表
//!
//! 每个节点最多一个活动会话，出站消息经有界队列交给会话的写循环。
//! 推送是尽力而为的：队列已满或会话已关闭都视为推送失败。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use fleet_core::{FleetError, FleetResult};
use fleet_domain::messaging::ServerMessage;

/// 向节点推送会话消息
#[async_trait]
pub trait SessionPusher: Send + Sync {
    async fn push(&self, node_id: i64, message: ServerMessage) -> FleetResult<()>;

    async fn is_connected(&self, node_id: i64) -> bool;
}

struct SessionHandle {
    generation: Uuid,
    sender: mpsc::Sender<ServerMessage>,
    connected_at: DateTime<Utc>,
}

/// 新会话的注册结果，接收端交给会话写循环
pub struct SessionRegistration {
    pub node_id: i64,
    pub generation: Uuid,
    pub connected_at: DateTime<Utc>,
    pub receiver: mpsc::Receiver<ServerMessage>,
}

pub struct SessionHub {
    sessions: RwLock<HashMap<i64, SessionHandle>>,
    buffer: usize,
}

impl SessionHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
        }
    }

    /// 注册会话，同一节点的旧会话被替换（其发送端被丢弃，写循环随之结束）
    pub async fn register(&self, node_id: i64) -> SessionRegistration {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let generation = Uuid::new_v4();
        let connected_at = Utc::now();

        let previous = self.sessions.write().await.insert(
            node_id,
            SessionHandle {
                generation,
                sender,
                connected_at,
            },
        );

        if previous.is_some() {
            info!("节点 {} 重新建立会话，旧会话被替换", node_id);
        } else {
            info!("节点 {} 建立会话", node_id);
        }

        SessionRegistration {
            node_id,
            generation,
            connected_at,
            receiver,
        }
    }

    /// 注销会话，只有代次匹配时才移除，避免误删新会话
    pub async fn unregister(&self, node_id: i64, generation: Uuid) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(&node_id) {
            Some(handle) if handle.generation == generation => {
                sessions.remove(&node_id);
                info!("节点 {} 会话已关闭", node_id);
                true
            }
            _ => false,
        }
    }

    pub async fn connected_nodes(&self) -> Vec<i64> {
        let mut nodes: Vec<i64> = self.sessions.read().await.keys().copied().collect();
        nodes.sort_unstable();
        nodes
    }

    pub async fn connected_at(&self, node_id: i64) -> Option<DateTime<Utc>> {
        self.sessions
            .read()
            .await
            .get(&node_id)
            .map(|h| h.connected_at)
    }

    /// 向所有会话推送消息，返回成功的数量
    pub async fn broadcast(&self, message: ServerMessage) -> usize {
        let nodes = self.connected_nodes().await;
        let mut delivered = 0;
        for node_id in nodes {
            match self.push(node_id, message.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!("向节点 {} 广播消息失败: {}", node_id, e),
            }
        }
        delivered
    }
}

#[async_trait]
impl SessionPusher for SessionHub {
    async fn push(&self, node_id: i64, message: ServerMessage) -> FleetResult<()> {
        let sender = {
            let sessions = self.sessions.read().await;
            match sessions.get(&node_id) {
                Some(handle) => handle.sender.clone(),
                None => return Err(FleetError::SessionUnavailable { node_id }),
            }
        };

        match sender.try_send(message) {
            Ok(()) => {
                debug!("消息已加入节点 {} 的出站队列", node_id);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("节点 {} 的出站队列已满", node_id);
                Err(FleetError::SessionUnavailable { node_id })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                let mut sessions = self.sessions.write().await;
                if sessions
                    .get(&node_id)
                    .is_some_and(|h| h.sender.is_closed())
                {
                    sessions.remove(&node_id);
                }
                Err(FleetError::SessionUnavailable { node_id })
            }
        }
    }

    async fn is_connected(&self, node_id: i64) -> bool {
        self.sessions
            .read()
            .await
            .get(&node_id)
            .is_some_and(|h| !h.sender.is_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_push_delivers_to_registered_session() {
        let hub = SessionHub::new(4);
        let mut registration = hub.register(1).await;

        hub.push(1, ServerMessage::Shutdown).await.unwrap();
        assert_eq!(registration.receiver.recv().await, Some(ServerMessage::Shutdown));
        assert!(hub.is_connected(1).await);
    }

    #[tokio::test]
    async fn test_push_to_unknown_node_fails() {
        let hub = SessionHub::new(4);
        assert!(matches!(
            hub.push(9, ServerMessage::Shutdown).await,
            Err(FleetError::SessionUnavailable { node_id: 9 })
        ));
    }

    #[tokio::test]
    async fn test_full_queue_is_push_failure() {
        let hub = SessionHub::new(1);
        let _registration = hub.register(1).await;

        hub.push(1, ServerMessage::Shutdown).await.unwrap();
        assert!(hub.push(1, ServerMessage::Shutdown).await.is_err());
    }

    #[tokio::test]
    async fn test_closed_session_is_removed() {
        let hub = SessionHub::new(4);
        let registration = hub.register(1).await;
        drop(registration);

        assert!(!hub.is_connected(1).await);
        assert!(hub.push(1, ServerMessage::Shutdown).await.is_err());
        assert!(hub.connected_nodes().await.is_empty());
    }

    #[tokio::test]
    async fn test_stale_unregister_keeps_new_session() {
        let hub = SessionHub::new(4);
        let old = hub.register(1).await;
        let _new = hub.register(1).await;

        assert!(!hub.unregister(1, old.generation).await);
        assert!(hub.is_connected(1).await);
    }

    #[tokio::test]
    async fn test_broadcast() {
        let hub = SessionHub::new(4);
        let mut a = hub.register(1).await;
        let mut b = hub.register(2).await;

        assert_eq!(hub.broadcast(ServerMessage::Shutdown).await, 2);
        assert!(a.receiver.recv().await.is_some());
        assert!(b.receiver.recv().await.is_some());
    }
}
