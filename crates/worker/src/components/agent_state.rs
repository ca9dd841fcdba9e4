use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch, RwLock};
use tracing::debug;

use fleet_domain::entities::Account;
use fleet_domain::messaging::NodeMessage;

use super::completion_reporter::PendingCompletionQueue;

/// 节点运行期的可变状态，由代理循环持有并按引用传给各组件
pub struct AgentState {
    node_id: i64,
    agent_version: String,
    started_at: Instant,
    pending: Arc<PendingCompletionQueue>,
    account: RwLock<Option<Account>>,
    session_tx: RwLock<Option<mpsc::Sender<NodeMessage>>>,
    /// 正在执行的任务，空闲时为 None
    in_flight: watch::Sender<Option<i64>>,
    tasks_executed: AtomicU64,
    accepting: AtomicBool,
}

impl AgentState {
    pub fn new(node_id: i64, agent_version: impl Into<String>) -> Self {
        Self {
            node_id,
            agent_version: agent_version.into(),
            started_at: Instant::now(),
            pending: Arc::new(PendingCompletionQueue::new()),
            account: RwLock::new(None),
            session_tx: RwLock::new(None),
            in_flight: watch::Sender::new(None),
            tasks_executed: AtomicU64::new(0),
            accepting: AtomicBool::new(true),
        }
    }

    pub fn node_id(&self) -> i64 {
        self.node_id
    }

    pub fn agent_version(&self) -> &str {
        &self.agent_version
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn pending(&self) -> &Arc<PendingCompletionQueue> {
        &self.pending
    }

    pub async fn account(&self) -> Option<Account> {
        self.account.read().await.clone()
    }

    pub async fn set_account(&self, account: Option<Account>) {
        *self.account.write().await = account;
    }

    pub async fn attach_session(&self, sender: mpsc::Sender<NodeMessage>) {
        *self.session_tx.write().await = Some(sender);
    }

    pub async fn detach_session(&self) {
        *self.session_tx.write().await = None;
    }

    /// 经会话通道发送事件，尽力而为，未连接或队列已满时丢弃
    pub async fn send_event(&self, message: NodeMessage) -> bool {
        let sender = self.session_tx.read().await.clone();
        match sender {
            Some(sender) => match sender.try_send(message) {
                Ok(()) => true,
                Err(e) => {
                    debug!("会话事件未发送: {}", e);
                    false
                }
            },
            None => {
                debug!("会话未连接，丢弃事件 {}", message.message_type());
                false
            }
        }
    }

    pub fn in_flight(&self) -> Option<i64> {
        *self.in_flight.borrow()
    }

    pub fn set_in_flight(&self, task_id: Option<i64>) {
        self.in_flight.send_replace(task_id);
    }

    /// 订阅执行状态的变化
    pub fn watch_in_flight(&self) -> watch::Receiver<Option<i64>> {
        self.in_flight.subscribe()
    }

    pub fn record_executed(&self) {
        self.tasks_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tasks_executed(&self) -> u64 {
        self.tasks_executed.load(Ordering::Relaxed)
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }
}
