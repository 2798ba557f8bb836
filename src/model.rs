use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::format::coerce;

/// Fields whose presence marks a connections-per-second snapshot.
pub const CPS_MARKER_FIELDS: &[&str] = &["ConnectionRate", "ConnectionsSucceeded", "ConnectionsAccepted"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    #[default]
    Throughput,
    Cps,
}

impl TestType {
    /// Parse the backend's `test_type` string. Unknown values yield `None` so the
    /// caller can fall back to inferring from data.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "throughput" => Some(TestType::Throughput),
            "cps" | "connections" => Some(TestType::Cps),
            _ => None,
        }
    }

    /// Resolve the tag once at ingestion: explicit config wins, data heuristic otherwise.
    pub fn resolve(explicit: Option<TestType>, server: &[StatSnapshot], client: &[StatSnapshot]) -> Self {
        explicit.unwrap_or_else(|| crate::stats::infer_test_type(server, client))
    }

    pub fn label(&self) -> &'static str {
        match self {
            TestType::Throughput => "Throughput",
            TestType::Cps => "CPS",
        }
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestType::Throughput => write!(f, "throughput"),
            TestType::Cps => write!(f, "cps"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Server,
    Client,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Server => "server",
            Role::Client => "client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend-reported lifecycle of a test. This crate displays it, never drives it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestStatus {
    Idle,
    Initializing,
    StartingServer,
    StartingClient,
    Running,
    Stopping,
    Completed,
    Error,
    Cancelled,
    Unknown(String),
}

impl TestStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "idle" => TestStatus::Idle,
            "initializing" => TestStatus::Initializing,
            "starting_server" => TestStatus::StartingServer,
            "starting_client" => TestStatus::StartingClient,
            "running" => TestStatus::Running,
            "stopping" => TestStatus::Stopping,
            "completed" => TestStatus::Completed,
            "error" => TestStatus::Error,
            "cancelled" => TestStatus::Cancelled,
            _ => TestStatus::Unknown(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TestStatus::Idle => "idle",
            TestStatus::Initializing => "initializing",
            TestStatus::StartingServer => "starting_server",
            TestStatus::StartingClient => "starting_client",
            TestStatus::Running => "running",
            TestStatus::Stopping => "stopping",
            TestStatus::Completed => "completed",
            TestStatus::Error => "error",
            TestStatus::Cancelled => "cancelled",
            TestStatus::Unknown(raw) => raw,
        }
    }

    /// Terminal states halt polling.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TestStatus::Completed | TestStatus::Error | TestStatus::Cancelled
        )
    }

    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            TestStatus::Running | TestStatus::StartingServer | TestStatus::StartingClient
        )
    }

    /// Human description shown next to the progress bar.
    pub fn describe(&self) -> &'static str {
        match self {
            TestStatus::Idle => "Idle",
            TestStatus::Initializing => "Initializing test...",
            TestStatus::StartingServer => "Starting server...",
            TestStatus::StartingClient => "Starting client...",
            TestStatus::Running => "Running test...",
            TestStatus::Stopping => "Collecting final statistics...",
            TestStatus::Completed => "Test completed successfully!",
            TestStatus::Error => "Test failed",
            TestStatus::Cancelled => "Test was cancelled.",
            TestStatus::Unknown(_) => "Unknown status",
        }
    }
}

impl Default for TestStatus {
    fn default() -> Self {
        TestStatus::Idle
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for TestStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TestStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(TestStatus::parse(&raw))
    }
}

/// One reporting interval for one role, as produced by the backend.
///
/// Field names and value encodings belong to the backend (values are usually
/// string-encoded integers), so the snapshot keeps them verbatim and exposes
/// coercing accessors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatSnapshot(BTreeMap<String, Value>);

impl StatSnapshot {
    /// Build from a JSON object; anything else is not a snapshot.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(StatSnapshot(map.into_iter().collect())),
            _ => None,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn has(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Numeric value of a field; absent or malformed coerces to 0.
    pub fn number(&self, field: &str) -> f64 {
        self.0.get(field).map(coerce).unwrap_or(0.0)
    }

    /// Unix seconds from the `Timestamp` field, when it parses.
    pub fn timestamp(&self) -> Option<i64> {
        let value = self.0.get("Timestamp")?;
        let secs = match value {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        secs.is_finite().then_some(secs as i64)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_cps_shaped(&self) -> bool {
        CPS_MARKER_FIELDS.iter().any(|f| self.has(f))
    }
}

impl<const N: usize> From<[(&str, &str); N]> for StatSnapshot {
    fn from(fields: [(&str, &str); N]) -> Self {
        StatSnapshot(
            fields
                .into_iter()
                .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
                .collect(),
        )
    }
}

/// Parse a JSON array of snapshots, skipping non-object entries.
pub fn snapshots_from_value(value: &Value) -> Vec<StatSnapshot> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .cloned()
                .filter_map(StatSnapshot::from_value)
                .collect()
        })
        .unwrap_or_default()
}

/// Live view of one monitored test, fed by poll updates.
#[derive(Debug, Clone, Serialize)]
pub struct TestRun {
    pub id: String,
    pub test_type: TestType,
    /// Whether `test_type` came from the backend rather than the data heuristic.
    pub test_type_explicit: bool,
    pub status: TestStatus,
    pub duration: f64,
    pub progress_percentage: f64,
    pub elapsed_time: f64,
    pub error_message: Option<String>,
    pub server: Vec<StatSnapshot>,
    pub client: Vec<StatSnapshot>,
}

/// Status fields of one `/api/test_status` poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusUpdate {
    pub status: TestStatus,
    pub progress_percentage: f64,
    pub elapsed_time: f64,
    pub duration: f64,
    pub test_type: Option<TestType>,
    pub error_message: Option<String>,
}

/// Histories of one `/api/current_stats` poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsUpdate {
    pub server: Vec<StatSnapshot>,
    pub client: Vec<StatSnapshot>,
    pub test_type: Option<TestType>,
}

impl TestRun {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            test_type: TestType::Throughput,
            test_type_explicit: false,
            status: TestStatus::Idle,
            duration: 0.0,
            progress_percentage: 0.0,
            elapsed_time: 0.0,
            error_message: None,
            server: Vec::new(),
            client: Vec::new(),
        }
    }

    pub fn remaining_time(&self) -> f64 {
        (self.duration - self.elapsed_time).max(0.0)
    }

    pub fn apply_status(&mut self, update: &StatusUpdate) {
        self.status = update.status.clone();
        self.progress_percentage = update.progress_percentage;
        self.elapsed_time = update.elapsed_time;
        self.duration = update.duration;
        if update.error_message.is_some() {
            self.error_message = update.error_message.clone();
        }
        if let Some(tt) = update.test_type {
            self.test_type = tt;
            self.test_type_explicit = true;
        }
    }

    /// Merge-append both role histories and settle the test type tag.
    pub fn apply_stats(&mut self, update: &StatsUpdate) {
        merge_history(&mut self.server, &update.server);
        merge_history(&mut self.client, &update.client);

        if let Some(tt) = update.test_type {
            self.test_type = tt;
            self.test_type_explicit = true;
        } else if !self.test_type_explicit {
            self.test_type = TestType::resolve(None, &self.server, &self.client);
        }
    }

    pub fn history(&self, role: Role) -> &[StatSnapshot] {
        match role {
            Role::Server => &self.server,
            Role::Client => &self.client,
        }
    }
}

/// Append the snapshots of `incoming` that are newer than what `held` already has.
///
/// Snapshots already received are never edited. Incoming snapshots without a
/// parseable timestamp are positional: only the tail beyond `held.len()` is taken.
pub fn merge_history(held: &mut Vec<StatSnapshot>, incoming: &[StatSnapshot]) {
    let last_ts = held.iter().rev().find_map(StatSnapshot::timestamp);

    match last_ts {
        Some(last) => {
            held.extend(
                incoming
                    .iter()
                    .filter(|s| s.timestamp().is_some_and(|ts| ts > last))
                    .cloned(),
            );
        }
        None => {
            if incoming.len() > held.len() {
                held.extend(incoming[held.len()..].iter().cloned());
            }
        }
    }
}

/// Entry of `/api/active_tests`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveTest {
    pub test_id: String,
    #[serde(default)]
    pub status: TestStatus,
    #[serde(default)]
    pub progress_percentage: f64,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub config: Value,
}

impl ActiveTest {
    pub fn test_type(&self) -> Option<TestType> {
        self.config
            .get("test_type")
            .and_then(Value::as_str)
            .and_then(TestType::parse)
    }

    pub fn short_id(&self) -> &str {
        short_id(&self.test_id)
    }
}

/// First eight characters of a test id, for compact display.
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}
