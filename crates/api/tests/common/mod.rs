use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use fleet_api::{create_app, AppState};
use fleet_core::{DestinationConfig, DispatcherConfig};
use fleet_dispatcher::{
    strategy_for, AccountService, CompletionService, DestinationService, HeartbeatMonitor,
    SessionHub, SessionService, TaskDispatcher, TaskStateMachine, VersionService,
};
use fleet_infrastructure::{MetricsCollector, Repositories};

pub struct TestApp {
    pub state: AppState,
    pub hub: Arc<SessionHub>,
    pub dispatcher: Arc<TaskDispatcher>,
    pub payload_dir: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(DispatcherConfig::default())
    }

    pub fn with_config(config: DispatcherConfig) -> Self {
        let repos = Repositories::in_memory();
        let metrics = Arc::new(MetricsCollector::new());
        let payload_dir = TempDir::new().unwrap();

        let state_machine = Arc::new(TaskStateMachine::new(
            repos.tasks.clone(),
            repos.nodes.clone(),
            repos.accounts.clone(),
            config.max_retries,
            metrics.clone(),
        ));
        let hub = Arc::new(SessionHub::new(config.session_buffer));
        let dispatcher = Arc::new(TaskDispatcher::new(
            state_machine.clone(),
            repos.nodes.clone(),
            repos.accounts.clone(),
            hub.clone(),
            strategy_for(config.node_selection),
            metrics.clone(),
            config.clone(),
        ));

        let mut destinations = HashMap::new();
        destinations.insert(
            "tech".to_string(),
            DestinationConfig {
                section_id: "42".to_string(),
                url: None,
                display_name: Some("技术".to_string()),
            },
        );

        let state = AppState {
            tasks: repos.tasks.clone(),
            monitor: Arc::new(HeartbeatMonitor::new(
                state_machine.clone(),
                repos.nodes.clone(),
                metrics.clone(),
                config.clone(),
            )),
            completions: Arc::new(CompletionService::new(state_machine.clone(), metrics.clone())),
            sessions: Arc::new(SessionService::new(
                hub.clone(),
                state_machine.clone(),
                metrics,
                config.reconnect_grace(),
            )),
            accounts: Arc::new(AccountService::new(repos.accounts.clone())),
            versions: Arc::new(VersionService::new(
                repos.versions.clone(),
                payload_dir.path(),
            )),
            destinations: Arc::new(DestinationService::new(destinations)),
            state_machine,
        };

        Self {
            state,
            hub,
            dispatcher,
            payload_dir,
        }
    }

    pub fn router(&self) -> Router {
        create_app(self.state.clone())
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        self.send(request).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }
}
