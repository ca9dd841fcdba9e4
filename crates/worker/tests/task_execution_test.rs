mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{broadcast, mpsc};

use fleet_core::{DestinationConfig, FleetError, FleetResult, ManualClock, RetryPolicy};
use fleet_domain::entities::{Account, NewTask, Task, TaskPayload};
use fleet_domain::messaging::{NodeMessage, TaskOutcome};
use fleet_worker::components::TaskExecutionManager;
use fleet_worker::{
    AgentState, CompletionReporter, ExecutionContext, ReportResult, TaskExecutor,
};

use common::StubCoordinator;

/// 记录收到的上下文，按任务负载决定成功或失败
#[derive(Default)]
struct StubExecutor {
    seen: Mutex<Vec<ExecutionContext>>,
    runs: AtomicUsize,
}

#[async_trait]
impl TaskExecutor for StubExecutor {
    async fn execute(&self, context: &ExecutionContext) -> FleetResult<Option<String>> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(context.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;

        match &context.task.payload {
            TaskPayload::Comment { content, .. } if content == "fail" => {
                Err(FleetError::TaskExecution("评论被拦截".to_string()))
            }
            _ => Ok(Some(format!("result-{}", context.task.id))),
        }
    }

    fn name(&self) -> &str {
        "stub"
    }
}

struct Fixture {
    state: Arc<AgentState>,
    api: Arc<StubCoordinator>,
    executor: Arc<StubExecutor>,
    manager: Arc<TaskExecutionManager>,
    events: mpsc::Receiver<NodeMessage>,
}

async fn fixture() -> Fixture {
    let state = Arc::new(AgentState::new(2, "1.0.0"));
    let api = StubCoordinator::new();
    let executor = Arc::new(StubExecutor::default());
    let reporter = Arc::new(CompletionReporter::new(
        2,
        api.clone(),
        RetryPolicy::fixed(Duration::from_secs(30), 3),
        Arc::new(ManualClock::default()),
        Arc::clone(state.pending()),
    ));
    let manager = Arc::new(TaskExecutionManager::new(
        state.clone(),
        executor.clone(),
        reporter,
        api.clone(),
    ));

    let (tx, events) = mpsc::channel(16);
    state.attach_session(tx).await;

    Fixture {
        state,
        api,
        executor,
        manager,
        events,
    }
}

fn task(id: i64, payload: TaskPayload) -> Task {
    let mut task = Task::new(NewTask::new(payload));
    task.id = id;
    task
}

fn comment(id: i64, content: &str) -> Task {
    task(
        id,
        TaskPayload::Comment {
            target_post_id: "post-1".to_string(),
            content: content.to_string(),
        },
    )
}

#[tokio::test]
async fn test_execute_success_reports_and_echoes() {
    let mut f = fixture().await;

    let result = f.manager.execute_one(comment(10, "好文")).await;
    assert!(matches!(result, ReportResult::Acknowledged(_)));

    assert_eq!(f.events.recv().await, Some(NodeMessage::TaskStarted { id: 10 }));
    assert_eq!(
        f.events.recv().await,
        Some(NodeMessage::TaskCompleted {
            id: 10,
            result: Some("result-10".to_string())
        })
    );

    let delivered = f.api.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(
        delivered[0].1.outcome,
        TaskOutcome::Success {
            result: Some("result-10".to_string())
        }
    );
    assert_eq!(f.state.tasks_executed(), 1);
    assert_eq!(f.state.in_flight(), None);
}

#[tokio::test]
async fn test_execute_failure_reports_error() {
    let mut f = fixture().await;

    f.manager.execute_one(comment(11, "fail")).await;

    assert_eq!(f.events.recv().await, Some(NodeMessage::TaskStarted { id: 11 }));
    assert!(matches!(
        f.events.recv().await,
        Some(NodeMessage::TaskFailed { id: 11, .. })
    ));
    assert!(matches!(
        f.api.delivered()[0].1.outcome,
        TaskOutcome::Failure { .. }
    ));
}

#[tokio::test]
async fn test_context_carries_account_and_destination() {
    let f = fixture().await;
    let account = Account::new("acc", json!({"cookie": "c"}));
    f.state.set_account(Some(account.clone())).await;
    *f.api.destination.lock().unwrap() = Some(DestinationConfig {
        section_id: "42".to_string(),
        url: None,
        display_name: Some("技术".to_string()),
    });

    f.manager
        .execute_one(task(
            12,
            TaskPayload::Publish {
                title: "t".to_string(),
                content: "c".to_string(),
                destination: Some("tech".to_string()),
            },
        ))
        .await;

    let seen = f.executor.seen.lock().unwrap();
    assert_eq!(seen[0].account.as_ref().map(|a| a.name.as_str()), Some("acc"));
    assert_eq!(
        seen[0].destination.as_ref().map(|d| d.section_id.as_str()),
        Some("42")
    );
}

#[tokio::test]
async fn test_queue_runs_tasks_in_order_without_duplicates() {
    let f = fixture().await;
    let (stop_tx, stop_rx) = broadcast::channel(1);
    let runner = {
        let manager = Arc::clone(&f.manager);
        tokio::spawn(async move { manager.run(stop_rx).await })
    };

    assert!(f.manager.enqueue(comment(1, "a")).await.unwrap());
    assert!(f.manager.enqueue(comment(2, "b")).await.unwrap());
    // 同一任务重复推送
    assert!(!f.manager.enqueue(comment(1, "a")).await.unwrap());

    tokio::time::timeout(Duration::from_secs(5), async {
        while f.api.delivered().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let ids: Vec<i64> = f.api.delivered().iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(f.executor.runs.load(Ordering::SeqCst), 2);

    stop_tx.send(()).unwrap();
    runner.await.unwrap();
}

#[tokio::test]
async fn test_shutdown_rejects_new_tasks() {
    let f = fixture().await;
    f.state.stop_accepting();
    assert!(!f.manager.enqueue(comment(1, "a")).await.unwrap());
    assert_eq!(f.manager.queued_len().await, 0);
    assert!(f.manager.wait_idle(Duration::from_millis(10)).await);
}

#[tokio::test]
async fn test_wait_idle_wakes_when_task_finishes() {
    let f = fixture().await;
    f.state.set_in_flight(Some(8));
    assert!(!f.manager.wait_idle(Duration::from_millis(20)).await);

    let state = Arc::clone(&f.state);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        state.set_in_flight(None);
    });

    let started = std::time::Instant::now();
    assert!(f.manager.wait_idle(Duration::from_secs(5)).await);
    assert!(started.elapsed() < Duration::from_secs(5));
}
