use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::model::{Role, TestType};

/// cyperf-monitor: configure, run and watch network performance tests.
#[derive(Parser, Debug, Clone)]
#[command(name = "cyperf-monitor", version)]
pub struct CliArgs {
    /// Base URL of the test orchestration API
    #[arg(
        long = "api-url",
        env = "CYPERF_MONITOR_API_URL",
        default_value = DEFAULT_API_URL,
        global = true
    )]
    pub api_url: String,

    /// Seconds between status/stats polls of the selected test
    #[arg(long = "poll-interval-secs", default_value_t = DEFAULT_POLL_INTERVAL_SECS, global = true)]
    pub poll_interval_secs: u64,

    /// Directory holding the last-result hand-off file
    #[arg(long = "state-dir", global = true)]
    pub state_dir: Option<PathBuf>,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long = "log-dir", global = true)]
    pub log_dir: Option<PathBuf>,

    /// Disable ANSI colors in tables and logs
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List tests known to the backend
    Active,

    /// Live-monitor a test (defaults to the first active test)
    Watch {
        /// Test id to monitor
        test_id: Option<String>,

        /// Serve the live session as JSON/SSE on this port
        #[arg(long = "serve")]
        serve: Option<u16>,
    },

    /// Configure and run a test, then show its results
    Run(RunArgs),

    /// Cancel a running test
    Cancel { test_id: String },

    /// Show backend logs, or the raw log of one role of a test
    Logs {
        #[arg(long = "role", value_enum)]
        role: Option<RoleArg>,

        #[arg(long = "test")]
        test_id: Option<String>,

        /// Clear the backend log buffer
        #[arg(long = "clear")]
        clear: bool,
    },

    /// Re-display the result of the last `run`
    Report,

    /// Export current stats and history of a test to JSON
    Export {
        test_id: String,

        #[arg(long = "out")]
        out: Option<PathBuf>,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    #[arg(long = "type", value_enum, default_value_t = TestTypeArg::Throughput)]
    pub test_type: TestTypeArg,

    #[arg(long = "server-ip")]
    pub server_ip: String,

    #[arg(long = "client-ip")]
    pub client_ip: String,

    #[arg(long = "port")]
    pub port: Option<u16>,

    #[arg(long = "duration")]
    pub duration: Option<u32>,

    #[arg(long = "snapshot-interval")]
    pub snapshot_interval: Option<u32>,

    #[arg(long = "bidirectional")]
    pub bidirectional: bool,

    /// Traffic flows server to client instead of client to server
    #[arg(long = "reverse")]
    pub reverse: bool,

    #[arg(long = "parallel")]
    pub parallel_sessions: Option<u32>,

    #[arg(long = "bandwidth-mbps")]
    pub bandwidth_mbps: Option<u32>,

    #[arg(long = "packet-size")]
    pub packet_size: Option<u32>,

    #[arg(long = "cps")]
    pub connections_per_second: Option<u32>,

    #[arg(long = "concurrent")]
    pub concurrent_connections: Option<u32>,

    /// Only validate the configuration, do not submit it
    #[arg(long = "validate-only")]
    pub validate_only: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestTypeArg {
    Throughput,
    Cps,
}

impl From<TestTypeArg> for TestType {
    fn from(arg: TestTypeArg) -> Self {
        match arg {
            TestTypeArg::Throughput => TestType::Throughput,
            TestTypeArg::Cps => TestType::Cps,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleArg {
    Server,
    Client,
}

impl From<RoleArg> for Role {
    fn from(arg: RoleArg) -> Self {
        match arg {
            RoleArg::Server => Role::Server,
            RoleArg::Client => Role::Client,
        }
    }
}

pub struct MonitorConfig {
    pub api_url: String,
    pub poll_interval: Duration,
    pub state_dir: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub use_color: bool,
}

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:5001";

// Polling constants
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;
pub const MIN_POLL_INTERVAL_SECS: u64 = 1;
pub const MAX_POLL_INTERVAL_SECS: u64 = 5;
pub const ACTIVE_TESTS_REFRESH_SECS: u64 = 5;
pub const MAX_STATUS_FAILURES: u32 = 3;

// HTTP constants
pub const HTTP_TIMEOUT_SECS: u64 = 10;
pub const RUN_TIMEOUT_GRACE_SECS: u64 = 30;

// Log constants
pub const LOG_BUFFER_SIZE: usize = 500;
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

// Hand-off constants
pub const LAST_RESULT_FILE: &str = "last-test-result.json";

impl MonitorConfig {
    pub fn from_args(args: &CliArgs) -> Self {
        let secs = args
            .poll_interval_secs
            .clamp(MIN_POLL_INTERVAL_SECS, MAX_POLL_INTERVAL_SECS);

        let state_dir = args
            .state_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("cyperf-monitor"));

        MonitorConfig {
            api_url: args.api_url.clone(),
            poll_interval: Duration::from_secs(secs),
            state_dir,
            log_dir: args.log_dir.clone(),
            use_color: !args.no_color,
        }
    }

    /// Path of the last-result hand-off file.
    pub fn last_result_path(&self) -> PathBuf {
        self.state_dir.join(LAST_RESULT_FILE)
    }
}
