#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use cyperf_monitor::api::{ApiResult, CurrentStats, MonitorBackend};
use cyperf_monitor::error::MonitorError;
use cyperf_monitor::logs::BackendLogEntry;
use cyperf_monitor::model::{ActiveTest, Role, StatSnapshot, StatsUpdate, StatusUpdate, TestStatus};
use cyperf_monitor::run_config::TestConfig;

/// One scripted answer to a status poll.
#[derive(Clone)]
pub enum StatusStep {
    Status(TestStatus),
    Fail,
}

/// Backend double answering from per-test scripts.
#[derive(Default)]
pub struct FakeBackend {
    statuses: Mutex<HashMap<String, VecDeque<StatusStep>>>,
    stats: Mutex<HashMap<String, StatsUpdate>>,
    delays: Mutex<HashMap<String, Duration>>,
    active: Mutex<Vec<ActiveTest>>,
    status_calls: Mutex<HashMap<String, usize>>,
    cancelled: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_status(&self, id: &str, steps: Vec<StatusStep>) {
        self.statuses
            .lock()
            .unwrap()
            .insert(id.to_string(), steps.into());
    }

    pub fn set_stats(&self, id: &str, update: StatsUpdate) {
        self.stats.lock().unwrap().insert(id.to_string(), update);
    }

    pub fn delay(&self, id: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(id.to_string(), delay);
    }

    pub fn set_active(&self, ids: &[&str]) {
        self.set_active_typed(ids, "throughput");
    }

    pub fn set_active_typed(&self, ids: &[&str], test_type: &str) {
        *self.active.lock().unwrap() = ids
            .iter()
            .map(|id| ActiveTest {
                test_id: id.to_string(),
                status: TestStatus::Running,
                progress_percentage: 0.0,
                start_time: None,
                config: json!({"test_type": test_type}),
            })
            .collect();
    }

    pub fn status_calls(&self, id: &str) -> usize {
        self.status_calls.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    async fn wait(&self, id: &str) {
        let delay = self.delays.lock().unwrap().get(id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Snapshot with numeric fields stored the way the backend sends them.
pub fn snapshot(fields: &[(&str, &str)]) -> StatSnapshot {
    let map: serde_json::Map<String, Value> = fields
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect();
    StatSnapshot::from_value(Value::Object(map)).unwrap()
}

pub fn running() -> StatusStep {
    StatusStep::Status(TestStatus::Running)
}

#[async_trait]
impl MonitorBackend for FakeBackend {
    async fn active_tests(&self) -> ApiResult<Vec<ActiveTest>> {
        Ok(self.active.lock().unwrap().clone())
    }

    async fn test_status(&self, test_id: &str) -> ApiResult<StatusUpdate> {
        *self
            .status_calls
            .lock()
            .unwrap()
            .entry(test_id.to_string())
            .or_default() += 1;
        self.wait(test_id).await;

        let step = {
            let mut statuses = self.statuses.lock().unwrap();
            match statuses.get_mut(test_id) {
                // The last step repeats once the script runs out.
                Some(steps) if steps.len() > 1 => steps.pop_front(),
                Some(steps) => steps.front().cloned(),
                None => Some(running()),
            }
        };
        match step.unwrap_or_else(running) {
            StatusStep::Status(status) => Ok(StatusUpdate {
                status,
                progress_percentage: 50.0,
                elapsed_time: 30.0,
                duration: 60.0,
                ..Default::default()
            }),
            StatusStep::Fail => Err(MonitorError::Http {
                status: 503,
                body: "unavailable".to_string(),
            }),
        }
    }

    async fn current_stats(&self, test_id: &str) -> ApiResult<CurrentStats> {
        self.wait(test_id).await;
        let update = self
            .stats
            .lock()
            .unwrap()
            .get(test_id)
            .cloned()
            .unwrap_or_default();
        Ok(CurrentStats {
            update,
            raw: json!({"status": "success", "test_id": test_id}),
        })
    }

    async fn cancel_test(&self, test_id: &str) -> ApiResult<()> {
        self.cancelled.lock().unwrap().push(test_id.to_string());
        Ok(())
    }

    async fn run_test_simple(&self, config: &TestConfig) -> ApiResult<Value> {
        Ok(json!({"status": "success", "duration": config.duration, "final_stats": null}))
    }

    async fn logs(&self) -> ApiResult<Vec<BackendLogEntry>> {
        Ok(Vec::new())
    }

    async fn clear_logs(&self) -> ApiResult<()> {
        Ok(())
    }

    async fn role_log(&self, _role: Role, _test_id: &str) -> ApiResult<String> {
        Ok(String::new())
    }
}
