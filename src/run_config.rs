//! Test configuration submitted to `/api/run_test_simple`, and the shape of its result.

use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::RunArgs;
use crate::error::MonitorError;
use crate::model::{snapshots_from_value, Role, StatSnapshot, TestType};
use crate::{format, stats, table};

pub const DEFAULT_PORT: u16 = 5202;
pub const DEFAULT_DURATION_SECS: u32 = 60;
pub const DEFAULT_SNAPSHOT_INTERVAL_SECS: u32 = 5;
pub const DEFAULT_PACKET_SIZE: u32 = 1500;
pub const DEFAULT_BANDWIDTH_MBPS: u32 = 1000;
pub const DEFAULT_CPS_RATE: u32 = 1000;
pub const DEFAULT_CONCURRENT_CONNECTIONS: u32 = 10_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Unidirectional,
    Bidirectional,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrafficDirection {
    #[default]
    ClientToServer,
    ServerToClient,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestConfig {
    pub test_type: TestType,
    pub server_ip: String,
    pub client_ip: String,
    pub port: u16,
    pub duration: u32,
    pub snapshot_interval: u32,
    pub direction: Direction,
    pub traffic_direction: TrafficDirection,
    pub parallel_sessions: u32,
    pub bandwidth_mbps: u32,
    pub packet_size: u32,
    pub connections_per_second: u32,
    pub concurrent_connections: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_result(self) -> Result<Vec<String>, MonitorError> {
        if self.errors.is_empty() {
            Ok(self.warnings)
        } else {
            Err(MonitorError::Validation(self.errors))
        }
    }
}

impl TestConfig {
    /// Throughput preset between the two endpoints.
    pub fn throughput(server_ip: impl Into<String>, client_ip: impl Into<String>) -> Self {
        Self {
            test_type: TestType::Throughput,
            server_ip: server_ip.into(),
            client_ip: client_ip.into(),
            port: DEFAULT_PORT,
            duration: DEFAULT_DURATION_SECS,
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL_SECS,
            direction: Direction::Unidirectional,
            traffic_direction: TrafficDirection::ClientToServer,
            parallel_sessions: 1,
            bandwidth_mbps: DEFAULT_BANDWIDTH_MBPS,
            packet_size: DEFAULT_PACKET_SIZE,
            connections_per_second: DEFAULT_CPS_RATE,
            concurrent_connections: DEFAULT_CONCURRENT_CONNECTIONS,
        }
    }

    /// Connections-per-second preset between the two endpoints.
    pub fn cps(server_ip: impl Into<String>, client_ip: impl Into<String>) -> Self {
        Self {
            test_type: TestType::Cps,
            ..Self::throughput(server_ip, client_ip)
        }
    }

    pub fn preset(test_type: TestType, server_ip: impl Into<String>, client_ip: impl Into<String>) -> Self {
        match test_type {
            TestType::Throughput => Self::throughput(server_ip, client_ip),
            TestType::Cps => Self::cps(server_ip, client_ip),
        }
    }

    pub fn from_args(args: &RunArgs) -> Self {
        let mut config = Self::preset(args.test_type.into(), &args.server_ip, &args.client_ip);
        if let Some(port) = args.port {
            config.port = port;
        }
        if let Some(duration) = args.duration {
            config.duration = duration;
        }
        if let Some(interval) = args.snapshot_interval {
            config.snapshot_interval = interval;
        }
        if args.bidirectional {
            config.direction = Direction::Bidirectional;
        }
        if args.reverse {
            config.traffic_direction = TrafficDirection::ServerToClient;
        }
        if let Some(parallel) = args.parallel_sessions {
            config.parallel_sessions = parallel;
        }
        if let Some(bw) = args.bandwidth_mbps {
            config.bandwidth_mbps = bw;
        }
        if let Some(size) = args.packet_size {
            config.packet_size = size;
        }
        if let Some(rate) = args.connections_per_second {
            config.connections_per_second = rate;
        }
        if let Some(concurrent) = args.concurrent_connections {
            config.concurrent_connections = concurrent;
        }
        config
    }

    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        if self.server_ip.trim().parse::<Ipv4Addr>().is_err() {
            report.errors.push("Invalid server IP address format".to_string());
        }
        if self.client_ip.trim().parse::<Ipv4Addr>().is_err() {
            report.errors.push("Invalid client IP address format".to_string());
        }
        if !(1..=3600).contains(&self.duration) {
            report
                .errors
                .push("Duration must be between 1 and 3600 seconds".to_string());
        }
        if !(1..=60).contains(&self.snapshot_interval) {
            report
                .errors
                .push("Snapshot interval must be between 1 and 60 seconds".to_string());
        }

        match self.test_type {
            TestType::Throughput => {
                if !(1..=10_000).contains(&self.bandwidth_mbps) {
                    report
                        .warnings
                        .push("Bandwidth outside typical range (1-10000 Mbps)".to_string());
                }
                if !(64..=9000).contains(&self.packet_size) {
                    report
                        .warnings
                        .push("Packet size outside typical range (64-9000 bytes)".to_string());
                }
            }
            TestType::Cps => {
                if !(1..=100_000).contains(&self.connections_per_second) {
                    report
                        .warnings
                        .push("CPS outside typical range (1-100000)".to_string());
                }
                if !(1..=1_000_000).contains(&self.concurrent_connections) {
                    report
                        .warnings
                        .push("Concurrent connections outside typical range (1-1000000)".to_string());
                }
            }
        }
        report
    }

    /// Flat request body as the backend's simple-run endpoint expects it.
    pub fn to_request_body(&self) -> Value {
        json!({
            "test_type": self.test_type,
            "server_ip": self.server_ip,
            "client_ip": self.client_ip,
            "port": self.port,
            "duration": self.duration,
            "snapshot_interval": self.snapshot_interval,
            "direction": self.direction,
            "traffic_direction": self.traffic_direction,
            "bidi": self.direction == Direction::Bidirectional,
            "parallel_sessions": self.parallel_sessions,
            "bandwidth_mbps": self.bandwidth_mbps,
            "packet_size": self.packet_size,
            "connections_per_second": self.connections_per_second,
            "concurrent_connections": self.concurrent_connections,
        })
    }
}

/// What a completed run returned, by how much of the expected shape is there.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    Stats {
        test_id: Option<String>,
        test_type: TestType,
        server: Vec<StatSnapshot>,
        client: Vec<StatSnapshot>,
    },
    /// `final_stats` present in an unexpected shape; shown verbatim.
    RawData(Value),
    /// No stats at all, usually because the backend could not reach the agents.
    NoData,
}

impl RunOutcome {
    pub fn from_response(response: &Value, configured: Option<TestType>) -> Self {
        let Some(final_stats) = response.get("final_stats").filter(|v| !v.is_null()) else {
            return RunOutcome::NoData;
        };

        let server_stats = final_stats.get("server_stats");
        let client_stats = final_stats.get("client_stats");
        if server_stats.is_none() && client_stats.is_none() {
            return RunOutcome::RawData(final_stats.clone());
        }

        let raw = |stats: Option<&Value>| {
            stats
                .and_then(|s| s.get("raw_data"))
                .map(snapshots_from_value)
                .unwrap_or_default()
        };
        let server = raw(server_stats);
        let client = raw(client_stats);
        let explicit = configured.or_else(|| {
            response
                .get("test_type")
                .and_then(Value::as_str)
                .and_then(TestType::parse)
        });

        RunOutcome::Stats {
            test_id: response
                .get("api_test_id")
                .or_else(|| response.get("test_id"))
                .and_then(Value::as_str)
                .map(str::to_string),
            test_type: TestType::resolve(explicit, &server, &client),
            server,
            client,
        }
    }

    pub fn status_label(&self) -> &'static str {
        match self {
            RunOutcome::Stats { .. } => "Completed",
            RunOutcome::RawData(_) => "Completed (Raw Data)",
            RunOutcome::NoData => "Failed",
        }
    }
}

impl RunOutcome {
    /// Side-by-side summary plus both stats tables.
    pub fn to_text(&self, use_color: bool) -> String {
        let mut out = format!("Status: {}\n", self.status_label());
        match self {
            RunOutcome::Stats {
                test_id,
                test_type,
                server,
                client,
            } => {
                out.push_str(&format!(
                    "Test ID: {}\nType: {}\n\n",
                    test_id.as_deref().unwrap_or("-"),
                    test_type.label()
                ));
                for (role, history) in [(Role::Server, server), (Role::Client, client)] {
                    let metrics = stats::aggregate(history, role, *test_type);
                    let panel = stats::summary_panel(role, &metrics);
                    out.push_str(&format!("{}\n", role));
                    for (label, value) in &panel.rows {
                        out.push_str(&format!("  {:<24} {}\n", label, value));
                    }
                    let bytes = history.last().map(|s| s.number("BytesSent")).unwrap_or(0.0);
                    out.push_str(&format!("  {:<24} {}\n", "Bytes Sent", format::human_bytes(bytes)));
                    out.push_str(&table::render(history, role, *test_type).to_text(use_color));
                    out.push('\n');
                }
            }
            RunOutcome::RawData(raw) => {
                out.push_str("Test completed but data format unexpected. Raw data:\n");
                out.push_str(&serde_json::to_string_pretty(raw).unwrap_or_default());
                out.push('\n');
            }
            RunOutcome::NoData => {
                out.push_str("Test failed - No backend connection\n");
            }
        }
        out
    }
}

/// Time-based progress bar shown while a blocking run is in flight.
///
/// The backend reports nothing until the run returns, so the bar only tracks
/// wall-clock time and holds just short of the end until `finish`.
pub struct Countdown {
    bar: ProgressBar,
    ticker: JoinHandle<()>,
}

impl Countdown {
    pub fn start(duration_secs: u32) -> Self {
        let total = u64::from(duration_secs.max(1));
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len}s {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        bar.set_message("Running test...");

        let ticking = bar.clone();
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.tick().await;
            loop {
                interval.tick().await;
                if ticking.position() + 1 < total {
                    ticking.inc(1);
                } else {
                    ticking.set_message("Collecting final statistics...");
                }
            }
        });

        Self { bar, ticker }
    }

    pub fn finish(self, message: &str) {
        self.ticker.abort();
        self.bar.finish_with_message(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let report = TestConfig::throughput("10.0.0.1", "10.0.0.2").validate();
        assert!(report.is_valid());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn invalid_ip_and_ranges_are_errors() {
        let mut config = TestConfig::cps("10.0.0.300", "client");
        config.duration = 0;
        config.snapshot_interval = 61;
        let report = config.validate();
        assert_eq!(report.errors.len(), 4);
        assert!(matches!(
            report.into_result(),
            Err(MonitorError::Validation(errors)) if errors.len() == 4
        ));
    }

    #[test]
    fn out_of_range_tuning_only_warns() {
        let mut config = TestConfig::throughput("10.0.0.1", "10.0.0.2");
        config.bandwidth_mbps = 20_000;
        config.packet_size = 32;
        // CPS limits do not apply to a throughput test.
        config.connections_per_second = 0;
        let report = config.validate();
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn request_body_sets_bidi_from_direction() {
        let mut config = TestConfig::throughput("10.0.0.1", "10.0.0.2");
        config.direction = Direction::Bidirectional;
        config.traffic_direction = TrafficDirection::ServerToClient;
        let body = config.to_request_body();
        assert_eq!(body["bidi"], true);
        assert_eq!(body["direction"], "bidirectional");
        assert_eq!(body["traffic_direction"], "server_to_client");
        assert_eq!(body["test_type"], "throughput");
        assert_eq!(body["port"], 5202);
    }

    #[test]
    fn outcome_shapes() {
        let stats = RunOutcome::from_response(
            &json!({
                "status": "success",
                "api_test_id": "abc",
                "final_stats": {
                    "server_stats": {"raw_data": [{"ConnectionRate": "4"}]},
                    "client_stats": {"raw_data": []}
                }
            }),
            None,
        );
        match stats {
            RunOutcome::Stats {
                test_id,
                test_type,
                server,
                client,
            } => {
                assert_eq!(test_id.as_deref(), Some("abc"));
                assert_eq!(test_type, TestType::Cps);
                assert_eq!(server.len(), 1);
                assert!(client.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }

        let raw = RunOutcome::from_response(&json!({"final_stats": {"server": "text"}}), None);
        assert_eq!(raw.status_label(), "Completed (Raw Data)");

        let none = RunOutcome::from_response(&json!({"status": "success"}), None);
        assert_eq!(none, RunOutcome::NoData);
    }
}
