use anyhow::Result;
use chrono::Utc;
use fleet_core::DatabaseConfig;
use fleet_domain::entities::{
    Account, AgentVersion, NewTask, NodeStatus, Task, TaskFilter, TaskKind, TaskPayload,
    TaskStatus, WorkerNode,
};
use fleet_infrastructure::Repositories;

async fn sqlite_repositories() -> Result<Repositories> {
    let config = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        connection_timeout_seconds: 5,
    };
    let (repos, db) = Repositories::connect(&config).await?;
    assert!(db.is_some());
    Ok(repos)
}

fn publish_task(title: &str) -> Task {
    Task::new(NewTask::new(TaskPayload::Publish {
        title: title.to_string(),
        content: "正文".to_string(),
        destination: Some("tech".to_string()),
    }))
}

#[tokio::test]
async fn test_sqlite_task_repository_crud() -> Result<()> {
    let repos = sqlite_repositories().await?;

    let created = repos.tasks.create(&publish_task("第一篇")).await?;
    assert!(created.id > 0);

    let reply = Task::new(NewTask::new(TaskPayload::Reply {
        parent_task_id: created.id,
        content: "回复".to_string(),
        parent_result: None,
    }));
    let reply = repos.tasks.create(&reply).await?;

    let mut loaded = repos.tasks.find_by_id(created.id).await?.unwrap();
    assert_eq!(loaded.payload, created.payload);
    assert_eq!(loaded.status, TaskStatus::Pending);

    loaded.transition_to(TaskStatus::Dispatched)?;
    loaded.assigned_node = Some(2);
    repos.tasks.update(&loaded).await?;

    let dispatched = repos.tasks.find_by_status(TaskStatus::Dispatched).await?;
    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0].assigned_node, Some(2));
    assert!(dispatched[0].dispatched_at.is_some());

    let children = repos.tasks.find_children(created.id).await?;
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id, reply.id);

    let filter = TaskFilter {
        kind: Some(TaskKind::Reply),
        ..Default::default()
    };
    let replies = repos.tasks.list(&filter).await?;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].parent_task_id(), Some(created.id));

    let limited = repos
        .tasks
        .list(&TaskFilter {
            limit: Some(1),
            ..Default::default()
        })
        .await?;
    assert_eq!(limited.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_sqlite_node_repository_upsert() -> Result<()> {
    let repos = sqlite_repositories().await?;

    let mut node = WorkerNode::new(7, "10.0.0.7");
    repos.nodes.register(&node).await?;

    node.status = NodeStatus::Online;
    node.last_heartbeat = Some(Utc::now());
    node.metrics.hostname = Some("node-7".to_string());
    repos.nodes.register(&node).await?;

    let all = repos.nodes.find_all().await?;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].status, NodeStatus::Online);
    assert_eq!(all[0].metrics.hostname.as_deref(), Some("node-7"));

    node.assign(11);
    repos.nodes.update(&node).await?;
    let loaded = repos.nodes.find_by_id(7).await?.unwrap();
    assert_eq!(loaded.current_task, Some(11));
    assert_eq!(loaded.status, NodeStatus::Busy);

    assert!(repos.nodes.update(&WorkerNode::new(99, "x")).await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_sqlite_account_repository() -> Result<()> {
    let repos = sqlite_repositories().await?;

    let mut account = repos
        .accounts
        .create(&Account::new(
            "writer-01",
            serde_json::json!({"cookie": "opaque"}),
        ))
        .await?;
    assert!(repos.accounts.find_by_node(1).await?.is_none());

    account.assigned_node = Some(1);
    repos.accounts.update(&account).await?;

    let bound = repos.accounts.find_by_node(1).await?.unwrap();
    assert_eq!(bound.id, account.id);
    assert_eq!(bound.credentials["cookie"], "opaque");
    Ok(())
}

#[tokio::test]
async fn test_version_publish_replaces_current() -> Result<()> {
    for repos in [Repositories::in_memory(), sqlite_repositories().await?] {
        assert!(repos.versions.current().await?.is_none());

        for v in ["1.0.2", "1.0.3"] {
            repos
                .versions
                .publish(&AgentVersion {
                    version: v.parse()?,
                    changelog: format!("release {v}"),
                    payload_ref: format!("agent-{v}.bin"),
                    active: true,
                    published_at: Utc::now(),
                })
                .await?;
        }

        let current = repos.versions.current().await?.unwrap();
        assert_eq!(current.version.to_string(), "1.0.3");
        assert_eq!(current.payload_ref, "agent-1.0.3.bin");
    }
    Ok(())
}
