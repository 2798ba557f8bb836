//! Live chart instances fed from the full snapshot history on every tick.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::format;
use crate::model::{StatSnapshot, TestType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Throughput,
    Cps,
    Errors,
}

impl ChartKind {
    pub const ALL: [ChartKind; 3] = [ChartKind::Throughput, ChartKind::Cps, ChartKind::Errors];

    /// Chart group shown for a test type.
    pub fn group(test_type: TestType) -> &'static [ChartKind] {
        match test_type {
            TestType::Throughput => &[ChartKind::Throughput],
            TestType::Cps => &[ChartKind::Cps, ChartKind::Errors],
        }
    }

    /// Panel the chart draws into.
    pub fn target(&self) -> &'static str {
        match self {
            ChartKind::Throughput => "throughput-panel",
            ChartKind::Cps => "cps-panel",
            ChartKind::Errors => "errors-panel",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub label: String,
    pub data: Vec<f64>,
}

impl Series {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            data: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartInstance {
    pub kind: ChartKind,
    pub target: &'static str,
    pub title: String,
    pub y_axis: String,
    pub visible: bool,
    pub labels: Vec<String>,
    pub series: Vec<Series>,
}

impl ChartInstance {
    fn new(kind: ChartKind) -> Self {
        let (title, y_axis, series): (&str, &str, &[&str]) = match kind {
            ChartKind::Throughput => (
                "Real-time Throughput Performance",
                "Throughput (Mbps)",
                &["Server Throughput (Mbps)", "Client Throughput (Mbps)"],
            ),
            ChartKind::Cps => (
                "Real-time CPS Performance",
                "Connections",
                &[
                    "Client Connections Succeeded",
                    "Client Connections Failed",
                    "Server Connections Accepted",
                ],
            ),
            ChartKind::Errors => (
                "Errors",
                "Errors",
                &["Server Errors", "Client Errors"],
            ),
        };
        Self {
            kind,
            target: kind.target(),
            title: title.to_string(),
            y_axis: y_axis.to_string(),
            visible: kind == ChartKind::Throughput,
            labels: Vec::new(),
            series: series.iter().map(|l| Series::new(l)).collect(),
        }
    }

    fn clear(&mut self) {
        self.labels.clear();
        for s in &mut self.series {
            s.data.clear();
        }
    }

    fn replace(&mut self, labels: Vec<String>, data: Vec<Vec<f64>>) {
        self.labels = labels;
        for (series, values) in self.series.iter_mut().zip(data) {
            series.data = values;
        }
    }
}

/// Owns the chart instances of one monitoring session.
#[derive(Debug, Clone, Serialize)]
pub struct ChartRenderer {
    instances: BTreeMap<ChartKind, ChartInstance>,
    active: TestType,
    destroyed: bool,
}

impl Default for ChartRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl ChartRenderer {
    pub fn new() -> Self {
        Self {
            instances: ChartKind::ALL
                .iter()
                .map(|k| (*k, ChartInstance::new(*k)))
                .collect(),
            active: TestType::Throughput,
            destroyed: false,
        }
    }

    /// Replace every visible chart's labels and series from the full histories.
    pub fn update(&mut self, test_type: TestType, server: &[StatSnapshot], client: &[StatSnapshot]) {
        if self.destroyed {
            return;
        }
        self.show(test_type);

        let labels = time_labels(server, client);
        match test_type {
            TestType::Throughput => {
                if let Some(chart) = self.instances.get_mut(&ChartKind::Throughput) {
                    chart.replace(
                        labels,
                        vec![
                            column(server, |s| s.number("Throughput") / 1_000_000.0),
                            column(client, |s| s.number("Throughput") / 1_000_000.0),
                        ],
                    );
                }
            }
            TestType::Cps => {
                if let Some(chart) = self.instances.get_mut(&ChartKind::Cps) {
                    chart.replace(
                        labels.clone(),
                        vec![
                            column(client, |s| s.number("ConnectionsSucceeded")),
                            column(client, |s| s.number("ConnectionsFailed")),
                            column(server, |s| s.number("ConnectionsAccepted")),
                        ],
                    );
                }
                if let Some(chart) = self.instances.get_mut(&ChartKind::Errors) {
                    chart.replace(
                        labels,
                        vec![column(server, error_total), column(client, error_total)],
                    );
                }
            }
        }
    }

    /// Make the chart group of `test_type` the visible one.
    pub fn show(&mut self, test_type: TestType) {
        if test_type == self.active {
            return;
        }
        self.active = test_type;
        let group = ChartKind::group(test_type);
        for (kind, chart) in self.instances.iter_mut() {
            chart.visible = group.contains(kind);
            // The hidden group must not keep data shaped for the other test type.
            if !chart.visible {
                chart.clear();
            }
        }
    }

    /// Clear all series; instances stay alive.
    pub fn reset(&mut self) {
        for chart in self.instances.values_mut() {
            chart.clear();
        }
    }

    /// Tear down all instances. Later updates are ignored.
    pub fn destroy(&mut self) {
        self.instances.clear();
        self.destroyed = true;
    }

    pub fn visible(&self) -> impl Iterator<Item = &ChartInstance> {
        self.instances.values().filter(|c| c.visible)
    }
}

/// Sparkline rendering of a set of charts, one line per series.
pub fn render_charts<'a>(charts: impl IntoIterator<Item = &'a ChartInstance>, width: usize) -> String {
    let mut out = String::new();
    for chart in charts {
        out.push_str(&format!("{} [{}]\n", chart.title, chart.y_axis));
        let span = match (chart.labels.first(), chart.labels.last()) {
            (Some(first), Some(last)) => format!("{} .. {}", first, last),
            _ => "no data".to_string(),
        };
        for series in &chart.series {
            let last = series.data.last().copied().unwrap_or(0.0);
            out.push_str(&format!(
                "  {:<30} {} {:.2}\n",
                series.label,
                sparkline(&series.data, width),
                last
            ));
        }
        out.push_str(&format!("  {}\n", span));
    }
    out
}

fn time_labels(server: &[StatSnapshot], client: &[StatSnapshot]) -> Vec<String> {
    let source = if server.is_empty() { client } else { server };
    source
        .iter()
        .map(|s| format::timestamp(s.get("Timestamp")))
        .collect()
}

fn column(history: &[StatSnapshot], f: impl Fn(&StatSnapshot) -> f64) -> Vec<f64> {
    history.iter().map(f).collect()
}

fn error_total(snapshot: &StatSnapshot) -> f64 {
    snapshot
        .keys()
        .filter(|k| k.contains("Error") || k.contains("Dropped"))
        .map(|k| snapshot.number(k))
        .sum()
}

const BARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Render the last `width` points as block characters scaled to the window max.
pub fn sparkline(data: &[f64], width: usize) -> String {
    if data.is_empty() || width == 0 {
        return String::new();
    }
    let window = &data[data.len().saturating_sub(width)..];
    let max = window.iter().copied().fold(0.0, f64::max);
    window
        .iter()
        .map(|v| {
            if max <= 0.0 || !v.is_finite() || *v <= 0.0 {
                BARS[0]
            } else {
                let idx = ((v / max) * (BARS.len() - 1) as f64).round() as usize;
                BARS[idx.min(BARS.len() - 1)]
            }
        })
        .collect()
}
