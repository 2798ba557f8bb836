mod common;

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use common::{running, snapshot, FakeBackend, StatusStep};
use cyperf_monitor::api::CurrentStats;
use cyperf_monitor::charts::ChartKind;
use cyperf_monitor::error::MonitorError;
use cyperf_monitor::model::{StatsUpdate, StatusUpdate, TestStatus, TestType};
use cyperf_monitor::poller::PollEvent;
use cyperf_monitor::session::{self, MonitorSession};
use cyperf_monitor::stats::AggregatedMetrics;

fn session_with(backend: Arc<FakeBackend>) -> Arc<MonitorSession> {
    MonitorSession::new(backend, Duration::from_secs(1))
}

fn throughput_stats() -> StatsUpdate {
    StatsUpdate {
        server: vec![
            snapshot(&[("Timestamp", "1700000000"), ("Throughput", "2000000")]),
            snapshot(&[("Timestamp", "1700000001"), ("Throughput", "4000000")]),
        ],
        client: vec![snapshot(&[("Timestamp", "1700000000"), ("Throughput", "1000000")])],
        test_type: None,
    }
}

fn stats_event(id: &str, generation: u64, update: StatsUpdate) -> PollEvent {
    PollEvent::Stats {
        id: id.to_string(),
        generation,
        stats: CurrentStats {
            update,
            raw: json!({"status": "success"}),
        },
    }
}

#[tokio::test(start_paused = true)]
async fn test_selecting_new_test_discards_late_responses() {
    let backend = Arc::new(FakeBackend::new());
    let session = session_with(backend);

    session.select("a").await;
    let gen_a = session.poller().generation();
    session.select("b").await;
    let gen_b = session.poller().generation();

    assert_eq!(session.poller().active_id().as_deref(), Some("b"));
    assert!(!session.apply(stats_event("a", gen_a, throughput_stats())).await);
    // Right id under an old generation is stale too.
    assert!(!session.apply(stats_event("b", gen_a, throughput_stats())).await);
    assert!(session.apply(stats_event("b", gen_b, throughput_stats())).await);

    let view = session.view().await;
    assert_eq!(view.test_id.as_deref(), Some("b"));
    assert_eq!(view.server_table.rows.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_stats_update_metrics_tables_and_charts() {
    let backend = Arc::new(FakeBackend::new());
    let session = session_with(backend);
    session.select("t1").await;
    let generation = session.poller().generation();

    assert!(session.apply(stats_event("t1", generation, throughput_stats())).await);
    let view = session.view().await;

    assert_eq!(view.test_type, TestType::Throughput);
    assert_eq!(
        view.server_metrics,
        AggregatedMetrics::Throughput {
            avg_throughput: 3.0,
            peak_throughput: 4.0,
            avg_latency: 0.0,
        }
    );
    assert_eq!(view.charts.len(), 1);
    assert_eq!(view.charts[0].kind, ChartKind::Throughput);
    assert_eq!(view.charts[0].labels.len(), 2);
    assert_eq!(view.charts[0].series[0].data, vec![2.0, 4.0]);

    // The same history again adds nothing.
    assert!(session.apply(stats_event("t1", generation, throughput_stats())).await);
    assert_eq!(session.view().await.server_table.rows.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cps_data_switches_chart_group() {
    let backend = Arc::new(FakeBackend::new());
    let session = session_with(backend);
    session.select("t1").await;
    let generation = session.poller().generation();

    let update = StatsUpdate {
        client: vec![
            snapshot(&[
                ("Timestamp", "1700000000"),
                ("ConnectionRate", "10"),
                ("ConnectionsSucceeded", "8"),
                ("ConnectionsFailed", "2"),
            ]),
            snapshot(&[
                ("Timestamp", "1700000001"),
                ("ConnectionRate", "20"),
                ("ConnectionsSucceeded", "16"),
                ("ConnectionsFailed", "3"),
            ]),
        ],
        ..Default::default()
    };
    assert!(session.apply(stats_event("t1", generation, update)).await);

    let view = session.view().await;
    assert_eq!(view.test_type, TestType::Cps);
    let kinds: Vec<_> = view.charts.iter().map(|c| c.kind).collect();
    assert_eq!(kinds, vec![ChartKind::Cps, ChartKind::Errors]);
    match view.client_metrics {
        AggregatedMetrics::Cps {
            last_succeeded,
            sum_failed,
            ..
        } => {
            assert_eq!(last_succeeded, 16.0);
            assert_eq!(sum_failed, 5.0);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_refresh_active_auto_selects_first() {
    let backend = Arc::new(FakeBackend::new());
    backend.set_active(&["first", "second"]);
    let session = session_with(backend.clone());

    let tests = session.refresh_active().await.unwrap();
    assert_eq!(tests.len(), 2);
    assert_eq!(session.selected_id().await.as_deref(), Some("first"));

    // An existing selection is kept.
    backend.set_active(&["second"]);
    session.refresh_active().await.unwrap();
    assert_eq!(session.selected_id().await.as_deref(), Some("first"));
}

#[tokio::test(start_paused = true)]
async fn test_selected_cps_test_shows_cps_charts_before_stats() {
    let backend = Arc::new(FakeBackend::new());
    backend.set_active_typed(&["t1"], "cps");
    let session = session_with(backend);

    session.refresh_active().await.unwrap();
    let view = session.view().await;
    assert_eq!(view.test_type, TestType::Cps);
    let kinds: Vec<_> = view.charts.iter().map(|c| c.kind).collect();
    assert_eq!(kinds, ChartKind::group(view.test_type).to_vec());

    // The next selection goes back to the throughput group.
    session.select("other").await;
    let view = session.view().await;
    assert_eq!(view.test_type, TestType::Throughput);
    let kinds: Vec<_> = view.charts.iter().map(|c| c.kind).collect();
    assert_eq!(kinds, vec![ChartKind::Throughput]);
}

#[tokio::test(start_paused = true)]
async fn test_explicit_status_type_switches_chart_group() {
    let backend = Arc::new(FakeBackend::new());
    let session = session_with(backend);
    session.select("t1").await;
    let generation = session.poller().generation();

    assert!(
        session
            .apply(PollEvent::Status {
                id: "t1".to_string(),
                generation,
                update: StatusUpdate {
                    status: TestStatus::Running,
                    test_type: Some(TestType::Cps),
                    ..Default::default()
                },
            })
            .await
    );
    let view = session.view().await;
    assert_eq!(view.test_type, TestType::Cps);
    let kinds: Vec<_> = view.charts.iter().map(|c| c.kind).collect();
    assert_eq!(kinds, vec![ChartKind::Cps, ChartKind::Errors]);
}

#[tokio::test(start_paused = true)]
async fn test_stop_clears_finished_state() {
    let backend = Arc::new(FakeBackend::new());
    let session = session_with(backend);
    session.select("t1").await;
    let generation = session.poller().generation();

    assert!(session.apply(stats_event("t1", generation, throughput_stats())).await);
    assert!(
        session
            .apply(PollEvent::Finished {
                id: "t1".to_string(),
                generation,
                status: TestStatus::Completed,
            })
            .await
    );
    assert!(session.view().await.finished);

    session.stop().await;
    let view = session.view().await;
    assert!(view.test_id.is_none());
    assert!(!view.finished);
    assert!(view.connection_lost.is_none());
    assert!(session.export_data().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_requires_cancellable_selection() {
    let backend = Arc::new(FakeBackend::new());
    let session = session_with(backend.clone());

    assert!(matches!(
        session.cancel().await,
        Err(MonitorError::NoTestSelected)
    ));

    session.select("t1").await;
    let generation = session.poller().generation();
    // Freshly selected tests are idle until the first status arrives.
    assert!(matches!(
        session.cancel().await,
        Err(MonitorError::NotCancellable(_))
    ));

    session
        .apply(PollEvent::Status {
            id: "t1".to_string(),
            generation,
            update: StatusUpdate {
                status: TestStatus::Running,
                ..Default::default()
            },
        })
        .await;
    session.cancel().await.unwrap();
    assert_eq!(backend.cancelled(), vec!["t1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_event_loop_runs_test_to_completion() {
    let backend = Arc::new(FakeBackend::new());
    backend.script_status("t1", vec![running(), StatusStep::Status(TestStatus::Completed)]);
    backend.set_stats("t1", throughput_stats());
    let session = session_with(backend);
    let _events = session::spawn_event_loop(session.clone());
    let mut views = session.subscribe_views();

    session.select("t1").await;
    let finished = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let view = views.recv().await.unwrap();
            if view.finished {
                return view;
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(finished.status, Some(TestStatus::Completed));
    assert_eq!(finished.status_text, "Test completed successfully!");
    assert_eq!(finished.server_table.rows.len(), 2);

    let (recent, _) = session.logs.recent(10).await;
    assert!(recent.iter().any(|e| e.message.contains("Test completed successfully!")));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_polling() {
    let backend = Arc::new(FakeBackend::new());
    let session = session_with(backend);
    session.select("t1").await;

    session.shutdown().await;
    assert!(session.poller().active_id().is_none());
    assert!(session.view().await.charts.is_empty());
}
