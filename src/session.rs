//! Monitoring session: the selected test and everything derived from it.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::api::{ApiResult, MonitorBackend};
use crate::charts::{self, ChartInstance, ChartRenderer};
use crate::format;
use crate::config::{ACTIVE_TESTS_REFRESH_SECS, EVENT_CHANNEL_CAPACITY};
use crate::error::MonitorError;
use crate::logs::{LogLevel, LogSource, LogState};
use crate::model::{short_id, ActiveTest, Role, TestRun, TestStatus, TestType};
use crate::poller::{PollEvent, Poller};
use crate::stats::{self, AggregatedMetrics, SummaryPanel};
use crate::table::{self, StatsTable};

#[derive(Debug)]
struct SessionState {
    run: Option<TestRun>,
    /// Poller generation the current `run` was started under.
    generation: u64,
    charts: ChartRenderer,
    server_metrics: AggregatedMetrics,
    client_metrics: AggregatedMetrics,
    active_tests: Vec<ActiveTest>,
    /// Last raw current-stats body, kept for export.
    last_raw: Option<Value>,
    finished: bool,
    connection_lost: Option<String>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            run: None,
            generation: 0,
            charts: ChartRenderer::new(),
            server_metrics: AggregatedMetrics::zero(TestType::Throughput),
            client_metrics: AggregatedMetrics::zero(TestType::Throughput),
            active_tests: Vec::new(),
            last_raw: None,
            finished: false,
            connection_lost: None,
        }
    }

    fn clear_outcome(&mut self) {
        self.last_raw = None;
        self.finished = false;
        self.connection_lost = None;
    }

    fn accepts(&self, event: &PollEvent) -> bool {
        self.generation == event.generation()
            && self.run.as_ref().is_some_and(|run| run.id == event.id())
    }
}

/// Serializable snapshot of the session, as rendered by the CLI and the dashboard feed.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub test_id: Option<String>,
    pub short_id: Option<String>,
    pub test_type: TestType,
    pub status: Option<TestStatus>,
    pub status_text: String,
    pub progress_percentage: f64,
    pub elapsed_time: f64,
    pub remaining_time: f64,
    pub duration: f64,
    pub error_message: Option<String>,
    pub finished: bool,
    pub connection_lost: Option<String>,
    pub server_metrics: AggregatedMetrics,
    pub client_metrics: AggregatedMetrics,
    pub server_panel: SummaryPanel,
    pub client_panel: SummaryPanel,
    pub server_table: StatsTable,
    pub client_table: StatsTable,
    pub charts: Vec<ChartInstance>,
    pub active_tests: Vec<ActiveTest>,
}

impl SessionView {
    /// Full terminal redraw of the view.
    pub fn to_text(&self, use_color: bool, chart_width: usize) -> String {
        let Some(id) = self.short_id.as_deref() else {
            return "No test selected. Waiting for an active test...\n".to_string();
        };

        let mut out = format!(
            "Test {} [{}]  {}  {:.0}%  elapsed {}  remaining {}\n",
            id,
            self.test_type.label(),
            self.status_text,
            self.progress_percentage,
            format::duration(self.elapsed_time),
            format::duration(self.remaining_time),
        );
        if let Some(msg) = &self.error_message {
            out.push_str(&format!("Error: {}\n", msg));
        }
        if let Some(err) = &self.connection_lost {
            out.push_str(&format!("Lost connection to test monitoring: {}\n", err));
        }
        out.push('\n');

        for panel in [&self.server_panel, &self.client_panel] {
            let cells: Vec<String> = panel
                .rows
                .iter()
                .map(|(label, value)| format!("{}: {}", label, value))
                .collect();
            out.push_str(&format!("{:<7} {}\n", panel.role, cells.join("  |  ")));
        }
        out.push('\n');
        out.push_str(&charts::render_charts(&self.charts, chart_width));
        out.push('\n');
        out.push_str("Server\n");
        out.push_str(&self.server_table.to_text(use_color));
        out.push_str("\nClient\n");
        out.push_str(&self.client_table.to_text(use_color));
        out
    }
}

pub struct MonitorSession {
    backend: Arc<dyn MonitorBackend>,
    poller: Poller,
    state: RwLock<SessionState>,
    pub logs: LogState,
    views: broadcast::Sender<SessionView>,
}

impl MonitorSession {
    pub fn new(backend: Arc<dyn MonitorBackend>, poll_interval: Duration) -> Arc<Self> {
        let (views, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            poller: Poller::new(backend.clone(), poll_interval),
            backend,
            state: RwLock::new(SessionState::new()),
            logs: LogState::new(),
            views,
        })
    }

    pub fn poller(&self) -> &Poller {
        &self.poller
    }

    /// Views published after every applied event.
    pub fn subscribe_views(&self) -> broadcast::Receiver<SessionView> {
        self.views.subscribe()
    }

    /// Switch monitoring to `id`. The previous poller is stopped before anything else.
    pub async fn select(&self, id: &str) {
        let mut state = self.state.write().await;
        self.poller.stop();

        state.charts.reset();
        let mut run = TestRun::new(id);
        if let Some(tt) = state
            .active_tests
            .iter()
            .find(|t| t.test_id == id)
            .and_then(ActiveTest::test_type)
        {
            run.test_type = tt;
            run.test_type_explicit = true;
        }
        state.charts.show(run.test_type);
        state.server_metrics = AggregatedMetrics::zero(run.test_type);
        state.client_metrics = AggregatedMetrics::zero(run.test_type);
        state.run = Some(run);
        state.clear_outcome();
        // Lock is held across start so the first tick cannot race the generation.
        state.generation = self.poller.start(id);
        drop(state);

        info!("Monitoring test {}", id);
        self.logs
            .emit(
                LogSource::Session,
                LogLevel::Info,
                format!("Monitoring test {}", short_id(id)),
            )
            .await;
    }

    /// Fold a poll event into the session. Returns false when the event is stale.
    pub async fn apply(&self, event: PollEvent) -> bool {
        let mut state = self.state.write().await;
        if !state.accepts(&event) {
            return false;
        }

        let mut log_line = None;
        match event {
            PollEvent::Status { update, .. } => {
                let SessionState { run, charts, .. } = &mut *state;
                if let Some(run) = run.as_mut() {
                    run.apply_status(&update);
                    if update.test_type.is_some() {
                        charts.show(run.test_type);
                    }
                }
            }
            PollEvent::Stats { stats, .. } => {
                let SessionState {
                    run,
                    charts,
                    server_metrics,
                    client_metrics,
                    last_raw,
                    ..
                } = &mut *state;
                if let Some(run) = run.as_mut() {
                    run.apply_stats(&stats.update);
                    let tt = run.test_type;
                    *server_metrics = stats::aggregate(&run.server, Role::Server, tt);
                    *client_metrics = stats::aggregate(&run.client, Role::Client, tt);
                    charts.update(tt, &run.server, &run.client);
                }
                *last_raw = Some(stats.raw);
            }
            PollEvent::Finished { id, status, .. } => {
                state.finished = true;
                let level = match status {
                    TestStatus::Completed => LogLevel::Success,
                    TestStatus::Cancelled => LogLevel::Warn,
                    _ => LogLevel::Error,
                };
                let message = match (&status, state.run.as_ref().and_then(|r| r.error_message.as_deref())) {
                    (TestStatus::Error, Some(msg)) => format!("Test {} failed: {}", short_id(&id), msg),
                    _ => format!("Test {}: {}", short_id(&id), status.describe()),
                };
                log_line = Some((LogSource::Poller, level, message));
            }
            PollEvent::ConnectionLost { id, error, .. } => {
                warn!("Lost connection while monitoring {}: {}", id, error);
                state.connection_lost = Some(error);
                log_line = Some((
                    LogSource::Poller,
                    LogLevel::Error,
                    "Lost connection to test monitoring.".to_string(),
                ));
            }
        }

        let view = build_view(&state);
        drop(state);

        if let Some((source, level, message)) = log_line {
            self.logs.emit(source, level, message).await;
        }
        let _ = self.views.send(view);
        true
    }

    /// Reload the active test list; select the first test when nothing is selected.
    pub async fn refresh_active(&self) -> ApiResult<Vec<ActiveTest>> {
        let tests = self.backend.active_tests().await?;
        let first = {
            let mut state = self.state.write().await;
            state.active_tests = tests.clone();
            if state.run.is_none() {
                tests.first().map(|t| t.test_id.clone())
            } else {
                None
            }
        };
        if let Some(id) = first {
            self.select(&id).await;
        }
        Ok(tests)
    }

    /// Cancel the selected test if its status allows it.
    pub async fn cancel(&self) -> ApiResult<()> {
        let (id, status) = {
            let state = self.state.read().await;
            let run = state.run.as_ref().ok_or(MonitorError::NoTestSelected)?;
            (run.id.clone(), run.status.clone())
        };
        if !status.is_cancellable() {
            return Err(MonitorError::NotCancellable(status.to_string()));
        }

        self.backend.cancel_test(&id).await?;
        self.logs
            .emit(
                LogSource::Session,
                LogLevel::Warn,
                format!("Cancel requested for test {}", short_id(&id)),
            )
            .await;
        Ok(())
    }

    /// Stop polling and forget the selection. Charts stay usable.
    pub async fn stop(&self) {
        let mut state = self.state.write().await;
        self.poller.stop();
        state.run = None;
        state.clear_outcome();
        state.charts.reset();
    }

    pub async fn view(&self) -> SessionView {
        build_view(&*self.state.read().await)
    }

    pub async fn selected_id(&self) -> Option<String> {
        self.state.read().await.run.as_ref().map(|r| r.id.clone())
    }

    /// Last raw current-stats body and the merged histories, for export.
    pub async fn export_data(&self) -> Option<(String, Value, Value)> {
        let state = self.state.read().await;
        let run = state.run.as_ref()?;
        let history = serde_json::json!({
            "server": run.server,
            "client": run.client,
        });
        Some((
            run.id.clone(),
            state.last_raw.clone().unwrap_or(Value::Null),
            history,
        ))
    }

    /// Stop polling and tear down charts. The session is inert afterwards.
    pub async fn shutdown(&self) {
        let mut state = self.state.write().await;
        self.poller.stop();
        state.charts.destroy();
        info!("Monitor session shut down");
    }
}

fn build_view(state: &SessionState) -> SessionView {
    let run = state.run.as_ref();
    let test_type = run.map(|r| r.test_type).unwrap_or_default();
    let (server, client) = run
        .map(|r| (r.history(Role::Server), r.history(Role::Client)))
        .unwrap_or((&[][..], &[][..]));

    SessionView {
        test_id: run.map(|r| r.id.clone()),
        short_id: run.map(|r| short_id(&r.id).to_string()),
        test_type,
        status: run.map(|r| r.status.clone()),
        status_text: run
            .map(|r| r.status.describe().to_string())
            .unwrap_or_else(|| "No test selected".to_string()),
        progress_percentage: run.map(|r| r.progress_percentage).unwrap_or(0.0),
        elapsed_time: run.map(|r| r.elapsed_time).unwrap_or(0.0),
        remaining_time: run.map(TestRun::remaining_time).unwrap_or(0.0),
        duration: run.map(|r| r.duration).unwrap_or(0.0),
        error_message: run.and_then(|r| r.error_message.clone()),
        finished: state.finished,
        connection_lost: state.connection_lost.clone(),
        server_metrics: state.server_metrics,
        client_metrics: state.client_metrics,
        server_panel: stats::summary_panel(Role::Server, &state.server_metrics),
        client_panel: stats::summary_panel(Role::Client, &state.client_metrics),
        server_table: table::render(server, Role::Server, test_type),
        client_table: table::render(client, Role::Client, test_type),
        charts: state.charts.visible().cloned().collect(),
        active_tests: state.active_tests.clone(),
    }
}

/// Feed poller events into the session until the poller's channel closes.
pub fn spawn_event_loop(session: Arc<MonitorSession>) -> JoinHandle<()> {
    let mut rx = session.poller.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    session.apply(event).await;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Session fell behind the poller by {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Refresh the active test list on a fixed cadence.
pub fn spawn_active_refresh(session: Arc<MonitorSession>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(ACTIVE_TESTS_REFRESH_SECS));
        loop {
            interval.tick().await;
            if let Err(e) = session.refresh_active().await {
                warn!("Failed to refresh active tests: {}", e);
            }
        }
    })
}
