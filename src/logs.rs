use chrono::{DateTime, Utc};
use console::Style;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};
use tokio::sync::{broadcast, RwLock};

use crate::api::{ApiResult, MonitorBackend};
use crate::config::{EVENT_CHANNEL_CAPACITY, LOG_BUFFER_SIZE};
use crate::model::Role;

// --- Local event log ---

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub source: LogSource,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    Monitor,
    Poller,
    Backend,
    Session,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
    Success,
}

/// Session events shown to the user: a bounded backlog plus a live feed for `/logs/stream`.
#[derive(Clone)]
pub struct LogState {
    backlog: Arc<RwLock<VecDeque<LogEntry>>>,
    live: broadcast::Sender<LogEntry>,
}

impl Default for LogState {
    fn default() -> Self {
        Self::new()
    }
}

impl LogState {
    pub fn new() -> Self {
        let (live, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            backlog: Arc::new(RwLock::new(VecDeque::with_capacity(LOG_BUFFER_SIZE))),
            live,
        }
    }

    pub async fn emit(&self, source: LogSource, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            source,
            level,
            message: message.into(),
        };
        {
            let mut backlog = self.backlog.write().await;
            if backlog.len() == LOG_BUFFER_SIZE {
                backlog.pop_front();
            }
            backlog.push_back(entry.clone());
        }
        // No subscribers is the normal case outside `watch --serve`.
        let _ = self.live.send(entry);
    }

    /// Up to `limit` entries, newest first, and the size of the whole backlog.
    pub async fn recent(&self, limit: usize) -> (Vec<LogEntry>, usize) {
        let backlog = self.backlog.read().await;
        let entries = backlog.iter().rev().take(limit).cloned().collect();
        (entries, backlog.len())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.live.subscribe()
    }
}

// --- Backend log list (`/api/logs`) ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendLogEntry {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub test_id: Option<String>,
}

fn default_level() -> String {
    "INFO".to_string()
}

pub fn parse_backend_logs(json: &Value) -> Vec<BackendLogEntry> {
    json.get("logs")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Backend log entries split the way the logs page shows them.
#[derive(Debug, Default, PartialEq)]
pub struct GroupedLogs<'a> {
    pub server: Vec<&'a BackendLogEntry>,
    pub client: Vec<&'a BackendLogEntry>,
    pub api: Vec<&'a BackendLogEntry>,
}

pub fn group_backend_logs(entries: &[BackendLogEntry]) -> GroupedLogs<'_> {
    let mut grouped = GroupedLogs::default();
    for entry in entries {
        match entry.source.as_str() {
            "SERVER" | "SYSTEM" => grouped.server.push(entry),
            "CLIENT" | "TEST" => grouped.client.push(entry),
            _ => {}
        }
        if ["[API CALL]", "[API PAYLOAD]", "[API RESPONSE]"]
            .iter()
            .any(|tag| entry.message.contains(tag))
        {
            grouped.api.push(entry);
        }
    }
    grouped
}

impl BackendLogEntry {
    /// Level as tagged by the backend. Unknown tags count as info.
    pub fn log_level(&self) -> LogLevel {
        match self.level.trim().to_ascii_uppercase().as_str() {
            "ERROR" | "CRITICAL" => LogLevel::Error,
            "WARNING" | "WARN" => LogLevel::Warn,
            "SUCCESS" => LogLevel::Success,
            "DEBUG" => LogLevel::Debug,
            _ => LogLevel::Info,
        }
    }
}

/// Level of an untagged line from a raw role log.
pub fn classify_log_level(line: &str) -> LogLevel {
    let upper = line.to_uppercase();
    if upper.contains("ERROR") {
        LogLevel::Error
    } else if upper.contains("WARN") {
        LogLevel::Warn
    } else if upper.contains("SUCCESS") {
        LogLevel::Success
    } else if upper.contains("DEBUG") {
        LogLevel::Debug
    } else {
        LogLevel::Info
    }
}

pub async fn fetch_logs(backend: &dyn MonitorBackend) -> ApiResult<Vec<BackendLogEntry>> {
    backend.logs().await
}

pub async fn clear_logs(backend: &dyn MonitorBackend) -> ApiResult<()> {
    backend.clear_logs().await
}

pub async fn fetch_role_log(
    backend: &dyn MonitorBackend,
    role: Role,
    test_id: &str,
) -> ApiResult<ParsedRoleLog> {
    let content = backend.role_log(role, test_id).await?;
    Ok(parse_role_log(&content))
}

impl GroupedLogs<'_> {
    pub fn to_text(&self, use_color: bool) -> String {
        let mut out = String::new();
        for (title, entries) in [
            ("Server", &self.server),
            ("Client", &self.client),
            ("API trace", &self.api),
        ] {
            out.push_str(&format!("== {} ({}) ==\n", title, entries.len()));
            for entry in entries.iter() {
                let line = format!("{} [{}] {}", entry.timestamp, entry.level, entry.message);
                if use_color {
                    out.push_str(&level_style(entry.log_level()).apply_to(line).to_string());
                } else {
                    out.push_str(&line);
                }
                out.push('\n');
            }
            out.push('\n');
        }
        out
    }
}

fn level_style(level: LogLevel) -> Style {
    match level {
        LogLevel::Error => Style::new().red(),
        LogLevel::Warn => Style::new().yellow(),
        LogLevel::Success => Style::new().green(),
        LogLevel::Debug => Style::new().dim(),
        LogLevel::Info => Style::new(),
    }
}

// --- Raw role logs (`/api/proxy/{role}/logs/:id`) ---

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatsBlock {
    pub timestamp: String,
    pub rows: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ParsedRoleLog {
    /// Key/value pairs of the "Test Configuration Summary" section.
    pub config: Vec<(String, String)>,
    pub blocks: Vec<StatsBlock>,
    pub raw: String,
}

fn config_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)Test Configuration Summary(.*?)\n\n---").expect("valid config regex")
    })
}

fn block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"╭[^╰]*╰[^╯]*╯").expect("valid block regex"))
}

fn timestamp_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Timestamp: ([^\n]+)").expect("valid timestamp regex"))
}

fn column_split_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s{2,}").expect("valid split regex"))
}

/// Pull the configuration summary and box-drawn stats blocks out of a raw log.
pub fn parse_role_log(content: &str) -> ParsedRoleLog {
    let config = config_re()
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| {
            m.as_str()
                .trim()
                .lines()
                .filter_map(|line| {
                    let mut parts = column_split_re().splitn(line.trim(), 2);
                    let key = parts.next()?.trim();
                    let value = parts.next()?.trim();
                    (!key.is_empty() && !value.is_empty())
                        .then(|| (key.to_string(), value.to_string()))
                })
                .collect()
        })
        .unwrap_or_default();

    let blocks = block_re()
        .find_iter(content)
        .map(|m| {
            let block = m.as_str();
            let timestamp = timestamp_re()
                .captures(block)
                .and_then(|c| c.get(1))
                .map(|t| t.as_str().trim_end_matches(['│', ' ']).trim().to_string())
                .unwrap_or_else(|| "N/A".to_string());
            let rows = block
                .lines()
                .filter_map(|line| {
                    let cells: Vec<&str> = line.split('│').map(str::trim).collect();
                    // `│ key │ value │` splits into ["", key, value, ""].
                    if cells.len() < 4 {
                        return None;
                    }
                    let (key, value) = (cells[1], cells[2]);
                    (!key.is_empty() && key != "Basic Stats" && !value.is_empty())
                        .then(|| (key.to_string(), value.to_string()))
                })
                .collect();
            StatsBlock { timestamp, rows }
        })
        .collect();

    ParsedRoleLog {
        config,
        blocks,
        raw: content.to_string(),
    }
}

impl ParsedRoleLog {
    pub fn to_text(&self, use_color: bool) -> String {
        let mut out = String::new();
        if !self.config.is_empty() {
            out.push_str("Test Configuration\n");
            let width = self.config.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
            for (k, v) in &self.config {
                out.push_str(&format!("  {:<width$}  {}\n", k, v, width = width));
            }
            out.push('\n');
        }
        for block in &self.blocks {
            out.push_str(&format!("Timestamp: {}\n", block.timestamp));
            let width = block.rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
            for (k, v) in &block.rows {
                out.push_str(&format!("  {:<width$}  {}\n", k, v, width = width));
            }
            out.push('\n');
        }
        if self.config.is_empty() && self.blocks.is_empty() {
            for line in self.raw.lines() {
                if use_color {
                    out.push_str(&level_style(classify_log_level(line)).apply_to(line).to_string());
                } else {
                    out.push_str(line);
                }
                out.push('\n');
            }
        }
        out
    }
}
