//! Reduction of a snapshot history into summary metrics.
//!
//! Each CPS field has its own reduction: average for the rate, last value for the
//! monotonically increasing success counter, sum for the per-interval failure
//! delta and max for latency.

use serde::Serialize;

use crate::format::{self, Unit};
use crate::model::{Role, StatSnapshot, TestType};

const LATENCY_FIELD: &str = "AverageConnectionLatency";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AggregatedMetrics {
    Throughput {
        /// Mbps
        avg_throughput: f64,
        /// Mbps
        peak_throughput: f64,
        /// ms
        avg_latency: f64,
    },
    Cps {
        avg_conn_rate: f64,
        /// Client: ConnectionsSucceeded, server: ConnectionsAccepted.
        last_succeeded: f64,
        sum_failed: f64,
        /// ms
        peak_latency: f64,
    },
}

impl AggregatedMetrics {
    pub fn zero(test_type: TestType) -> Self {
        match test_type {
            TestType::Throughput => AggregatedMetrics::Throughput {
                avg_throughput: 0.0,
                peak_throughput: 0.0,
                avg_latency: 0.0,
            },
            TestType::Cps => AggregatedMetrics::Cps {
                avg_conn_rate: 0.0,
                last_succeeded: 0.0,
                sum_failed: 0.0,
                peak_latency: 0.0,
            },
        }
    }

    pub fn test_type(&self) -> TestType {
        match self {
            AggregatedMetrics::Throughput { .. } => TestType::Throughput,
            AggregatedMetrics::Cps { .. } => TestType::Cps,
        }
    }
}

/// Summary metrics for one role over its full history.
pub fn aggregate(history: &[StatSnapshot], role: Role, test_type: TestType) -> AggregatedMetrics {
    if history.is_empty() {
        return AggregatedMetrics::zero(test_type);
    }

    match test_type {
        TestType::Throughput => {
            let throughput: Vec<f64> = history
                .iter()
                .map(|s| s.number("Throughput") / 1_000_000.0)
                .collect();
            let latency: Vec<f64> = history
                .iter()
                .map(|s| s.number(LATENCY_FIELD) / 1000.0)
                .collect();

            AggregatedMetrics::Throughput {
                avg_throughput: mean(&throughput),
                peak_throughput: max(&throughput),
                avg_latency: mean(&latency),
            }
        }
        TestType::Cps => {
            let rates: Vec<f64> = history.iter().map(|s| s.number("ConnectionRate")).collect();
            let success_field = match role {
                Role::Client => "ConnectionsSucceeded",
                Role::Server => "ConnectionsAccepted",
            };
            let last_succeeded = history
                .last()
                .map(|s| s.number(success_field))
                .unwrap_or(0.0);
            let sum_failed = history.iter().map(|s| s.number("ConnectionsFailed")).sum();
            let latency: Vec<f64> = history
                .iter()
                .map(|s| s.number(LATENCY_FIELD) / 1000.0)
                .collect();

            AggregatedMetrics::Cps {
                avg_conn_rate: mean(&rates),
                last_succeeded,
                sum_failed,
                peak_latency: max(&latency),
            }
        }
    }
}

/// CPS when any snapshot of either role carries a connection-rate field.
pub fn infer_test_type(server: &[StatSnapshot], client: &[StatSnapshot]) -> TestType {
    let cps = server
        .iter()
        .chain(client.iter())
        .any(StatSnapshot::is_cps_shaped);
    if cps {
        TestType::Cps
    } else {
        TestType::Throughput
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn max(values: &[f64]) -> f64 {
    values.iter().copied().fold(0.0, f64::max)
}

/// Labelled display strings for a metrics panel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryPanel {
    pub role: Role,
    pub rows: Vec<(String, String)>,
}

pub fn summary_panel(role: Role, metrics: &AggregatedMetrics) -> SummaryPanel {
    let rows = match *metrics {
        AggregatedMetrics::Throughput {
            avg_throughput,
            peak_throughput,
            avg_latency,
        } => vec![
            ("Avg Throughput".to_string(), format::mbps_figure(avg_throughput)),
            ("Peak Throughput".to_string(), format::mbps_figure(peak_throughput)),
            ("Avg Latency".to_string(), format::ms_figure(avg_latency)),
        ],
        AggregatedMetrics::Cps {
            avg_conn_rate,
            last_succeeded,
            sum_failed,
            peak_latency,
        } => {
            let success_label = match role {
                Role::Client => "Connections Succeeded",
                Role::Server => "Connections Accepted",
            };
            vec![
                (
                    "Avg Connection Rate".to_string(),
                    format::format_number(avg_conn_rate.round(), Unit::ConnRate),
                ),
                (success_label.to_string(), format::count(last_succeeded)),
                ("Connections Failed".to_string(), format::count(sum_failed)),
                ("Peak Latency".to_string(), format::ms_figure(peak_latency)),
            ]
        }
    };
    SummaryPanel { role, rows }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(fields: &[(&str, &str)]) -> StatSnapshot {
        let map: serde_json::Map<String, serde_json::Value> = fields
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
            .collect();
        StatSnapshot::from_value(serde_json::Value::Object(map)).unwrap()
    }

    #[test]
    fn empty_history_is_zero_valued() {
        assert_eq!(
            aggregate(&[], Role::Server, TestType::Throughput),
            AggregatedMetrics::zero(TestType::Throughput)
        );
        assert_eq!(
            aggregate(&[], Role::Client, TestType::Cps),
            AggregatedMetrics::Cps {
                avg_conn_rate: 0.0,
                last_succeeded: 0.0,
                sum_failed: 0.0,
                peak_latency: 0.0
            }
        );
    }

    #[test]
    fn throughput_average_and_peak_span_full_history() {
        let history = vec![
            snap(&[("Throughput", "2000000")]),
            snap(&[("Throughput", "4000000")]),
        ];
        match aggregate(&history, Role::Server, TestType::Throughput) {
            AggregatedMetrics::Throughput {
                avg_throughput,
                peak_throughput,
                ..
            } => {
                assert_eq!(avg_throughput, 3.0);
                assert_eq!(peak_throughput, 4.0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn throughput_latency_is_averaged_in_ms() {
        let history = vec![
            snap(&[("AverageConnectionLatency", "1000")]),
            snap(&[("AverageConnectionLatency", "3000")]),
        ];
        match aggregate(&history, Role::Client, TestType::Throughput) {
            AggregatedMetrics::Throughput { avg_latency, .. } => assert_eq!(avg_latency, 2.0),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn cps_reductions_are_per_field() {
        let history = vec![
            snap(&[
                ("ConnectionRate", "10"),
                ("ConnectionsSucceeded", "8"),
                ("ConnectionsFailed", "2"),
                ("AverageConnectionLatency", "5000"),
            ]),
            snap(&[
                ("ConnectionRate", "20"),
                ("ConnectionsSucceeded", "16"),
                ("ConnectionsFailed", "3"),
                ("AverageConnectionLatency", "2000"),
            ]),
        ];
        assert_eq!(
            aggregate(&history, Role::Client, TestType::Cps),
            AggregatedMetrics::Cps {
                avg_conn_rate: 15.0,
                last_succeeded: 16.0,
                sum_failed: 5.0,
                peak_latency: 5.0,
            }
        );
    }

    #[test]
    fn server_cps_uses_accepted_counter() {
        let history = vec![
            snap(&[("ConnectionsAccepted", "10"), ("ConnectionsSucceeded", "0")]),
            snap(&[("ConnectionsAccepted", "20"), ("ConnectionsSucceeded", "0")]),
        ];
        match aggregate(&history, Role::Server, TestType::Cps) {
            AggregatedMetrics::Cps { last_succeeded, .. } => assert_eq!(last_succeeded, 20.0),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn malformed_values_count_as_zero() {
        let history = vec![
            snap(&[("Throughput", "n/a")]),
            snap(&[("Throughput", "2000000")]),
        ];
        match aggregate(&history, Role::Server, TestType::Throughput) {
            AggregatedMetrics::Throughput { avg_throughput, .. } => assert_eq!(avg_throughput, 1.0),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn inference_checks_both_roles() {
        let plain = vec![snap(&[("Throughput", "1")])];
        let cps = vec![snap(&[("ConnectionsAccepted", "1")])];
        assert_eq!(infer_test_type(&plain, &[]), TestType::Throughput);
        assert_eq!(infer_test_type(&plain, &cps), TestType::Cps);
    }

    #[test]
    fn panel_labels_follow_role() {
        let panel = summary_panel(Role::Server, &AggregatedMetrics::zero(TestType::Cps));
        assert_eq!(panel.rows[1].0, "Connections Accepted");
        let panel = summary_panel(Role::Client, &AggregatedMetrics::zero(TestType::Throughput));
        assert_eq!(panel.rows[0].1, "0.00 Mbps");
    }
}
