#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use fleet_core::{DestinationConfig, FleetError, FleetResult};
use fleet_domain::entities::{Account, AgentVersion, TaskStatus};
use fleet_domain::messaging::{CompletionAck, CompletionReport, TaskOutcome};
use fleet_domain::value_objects::SemanticVersion;
use fleet_worker::CoordinatorApi;

/// 记录调用的协调服务替身
#[derive(Default)]
pub struct StubCoordinator {
    pub offline: AtomicBool,
    pub completion_calls: AtomicUsize,
    pub completions: Mutex<Vec<(i64, CompletionReport)>>,
    pub unknown_tasks: Mutex<Vec<i64>>,
    pub version: Mutex<Option<AgentVersion>>,
    pub payload: Mutex<Vec<u8>>,
    pub account: Mutex<Option<Account>>,
    pub destination: Mutex<Option<DestinationConfig>>,
}

impl StubCoordinator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.completion_calls.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<(i64, CompletionReport)> {
        self.completions.lock().unwrap().clone()
    }

    pub fn publish(&self, version: &str, payload: &[u8]) {
        *self.version.lock().unwrap() = Some(AgentVersion {
            version: version.parse::<SemanticVersion>().unwrap(),
            changelog: "修复发布失败".to_string(),
            payload_ref: "fleet-agent".to_string(),
            active: true,
            published_at: Utc::now(),
        });
        *self.payload.lock().unwrap() = payload.to_vec();
    }

    fn check_online(&self) -> FleetResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(FleetError::Network("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CoordinatorApi for StubCoordinator {
    async fn report_completion(
        &self,
        task_id: i64,
        report: &CompletionReport,
    ) -> FleetResult<CompletionAck> {
        self.completion_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        if self.unknown_tasks.lock().unwrap().contains(&task_id) {
            return Err(FleetError::TaskNotFound { id: task_id });
        }

        let mut completions = self.completions.lock().unwrap();
        let duplicate = completions.iter().any(|(id, _)| *id == task_id);
        if !duplicate {
            completions.push((task_id, report.clone()));
        }
        let status = match report.outcome {
            TaskOutcome::Success { .. } => TaskStatus::Completed,
            TaskOutcome::Failure { .. } => TaskStatus::Failed,
        };
        Ok(CompletionAck {
            accepted: true,
            duplicate,
            status,
        })
    }

    async fn get_assigned_account(&self, _node_id: i64) -> FleetResult<Option<Account>> {
        self.check_online()?;
        Ok(self.account.lock().unwrap().clone())
    }

    async fn get_current_version(&self) -> FleetResult<Option<AgentVersion>> {
        self.check_online()?;
        Ok(self.version.lock().unwrap().clone())
    }

    async fn download_payload(&self) -> FleetResult<Vec<u8>> {
        self.check_online()?;
        Ok(self.payload.lock().unwrap().clone())
    }

    async fn resolve_destination(&self, _name: &str) -> FleetResult<Option<DestinationConfig>> {
        self.check_online()?;
        Ok(self.destination.lock().unwrap().clone())
    }
}
