//! 完成确认的可靠上报
//!
//! 先按有界策略重试，耗尽后转入本地待确认队列；
//! 队列在每次成功连接时以及会话保持期间定期冲刷，只有服务端确认后才移除条目。

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use fleet_core::{Clock, FleetResult, RetryPolicy};
use fleet_domain::messaging::{CompletionAck, CompletionReport, TaskOutcome};

use super::dispatcher_client::CoordinatorApi;

/// 尚未被服务端确认的完成报告
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCompletion {
    pub task_id: i64,
    pub report: CompletionReport,
    pub queued_at: DateTime<Utc>,
}

/// 待确认队列，按入队顺序冲刷
#[derive(Debug, Default)]
pub struct PendingCompletionQueue {
    entries: Mutex<VecDeque<PendingCompletion>>,
}

impl PendingCompletionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同一任务只保留最新的报告
    pub async fn push(&self, entry: PendingCompletion) {
        let mut entries = self.entries.lock().await;
        entries.retain(|e| e.task_id != entry.task_id);
        entries.push_back(entry);
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn snapshot(&self) -> Vec<PendingCompletion> {
        self.entries.lock().await.iter().cloned().collect()
    }

    async fn front(&self) -> Option<PendingCompletion> {
        self.entries.lock().await.front().cloned()
    }

    async fn remove(&self, task_id: i64) {
        self.entries.lock().await.retain(|e| e.task_id != task_id);
    }
}

/// 一次上报的结果
#[derive(Debug, Clone, PartialEq)]
pub enum ReportResult {
    Acknowledged(CompletionAck),
    /// 重试耗尽，已转入待确认队列
    Queued,
    /// 服务端明确拒绝（例如任务不存在），不再重试
    Rejected(String),
}

/// 冲刷结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub delivered: usize,
    pub dropped: usize,
    pub remaining: usize,
}

pub struct CompletionReporter {
    node_id: i64,
    api: Arc<dyn CoordinatorApi>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    pending: Arc<PendingCompletionQueue>,
}

impl CompletionReporter {
    pub fn new(
        node_id: i64,
        api: Arc<dyn CoordinatorApi>,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
        pending: Arc<PendingCompletionQueue>,
    ) -> Self {
        Self {
            node_id,
            api,
            policy,
            clock,
            pending,
        }
    }

    pub fn pending(&self) -> &Arc<PendingCompletionQueue> {
        &self.pending
    }

    /// 上报任务结果，瞬时错误按策略重试
    pub async fn report(&self, task_id: i64, outcome: TaskOutcome) -> ReportResult {
        let report = CompletionReport {
            node_id: self.node_id,
            outcome,
        };

        // 外层 Err 触发重试，内层 Err 是不可恢复的拒绝
        let result = self
            .policy
            .retry(self.clock.as_ref(), "完成确认", |attempt| {
                let api = Arc::clone(&self.api);
                let report = report.clone();
                async move {
                    match api.report_completion(task_id, &report).await {
                        Ok(ack) => Ok(Ok(ack)),
                        Err(e) if e.is_transient() => {
                            warn!("任务 {} 第 {} 次完成确认失败: {}", task_id, attempt, e);
                            Err(e)
                        }
                        Err(e) => Ok(Err(e)),
                    }
                }
            })
            .await;

        match result {
            Ok(Ok(ack)) => {
                info!(
                    "任务 {} 完成确认成功 (状态: {}, 重复: {})",
                    task_id, ack.status, ack.duplicate
                );
                ReportResult::Acknowledged(ack)
            }
            Ok(Err(e)) => {
                error!("任务 {} 的完成报告被服务端拒绝: {}", task_id, e);
                ReportResult::Rejected(e.to_string())
            }
            Err(exhausted) => {
                warn!(
                    "任务 {} 完成确认 {} 次均失败，转入待确认队列: {}",
                    task_id, exhausted.attempts, exhausted.last_error
                );
                self.pending
                    .push(PendingCompletion {
                        task_id,
                        report,
                        queued_at: self.clock.now(),
                    })
                    .await;
                ReportResult::Queued
            }
        }
    }

    /// 冲刷待确认队列，每条只尝试一次
    ///
    /// 遇到瞬时错误即停止，剩余条目留待下次连接；被拒绝的条目丢弃。
    pub async fn flush(&self) -> FleetResult<FlushSummary> {
        let mut summary = FlushSummary::default();

        while let Some(entry) = self.pending.front().await {
            match self.api.report_completion(entry.task_id, &entry.report).await {
                Ok(ack) => {
                    self.pending.remove(entry.task_id).await;
                    summary.delivered += 1;
                    info!(
                        "待确认任务 {} 冲刷成功 (状态: {}, 重复: {})",
                        entry.task_id, ack.status, ack.duplicate
                    );
                }
                Err(e) if e.is_transient() => {
                    summary.remaining = self.pending.len().await;
                    warn!("冲刷待确认队列中断，剩余 {} 条: {}", summary.remaining, e);
                    return Err(e);
                }
                Err(e) => {
                    self.pending.remove(entry.task_id).await;
                    summary.dropped += 1;
                    error!("待确认任务 {} 被服务端拒绝，丢弃: {}", entry.task_id, e);
                }
            }
        }

        if summary.delivered + summary.dropped > 0 {
            info!(
                "待确认队列冲刷完成: 成功 {}，丢弃 {}",
                summary.delivered, summary.dropped
            );
        }
        Ok(summary)
    }

    /// 冲刷失败时把错误降级为日志，返回剩余条数
    pub async fn try_flush(&self) -> usize {
        if let Err(e) = self.flush().await {
            if !e.is_transient() {
                error!("冲刷待确认队列出错: {}", e);
            }
        }
        self.pending.len().await
    }

    /// 会话保持期间按固定间隔冲刷待确认队列，由调用方在会话结束时中止
    ///
    /// 确认通道和会话通道是两条独立的链路，会话一直在线时也不能只等重连。
    pub async fn run_periodic_flush(&self, period: Duration) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // 第一次 tick 立即返回，会话建立时已经冲刷过
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if self.pending.is_empty().await {
                continue;
            }
            let remaining = self.try_flush().await;
            debug!("定期冲刷后待确认队列剩余 {} 条", remaining);
        }
    }
}
