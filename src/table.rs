//! Projection of snapshot rows into a display table.

use console::Style;
use serde::Serialize;

use crate::format;
use crate::model::{Role, StatSnapshot, TestType};

pub const SERVER_THROUGHPUT_FIELDS: &[&str] = &[
    "Timestamp",
    "Throughput",
    "ThroughputTX",
    "ThroughputRX",
    "TCPDataThroughput",
    "TCPDataThroughputRX",
    "BytesSent",
    "BytesReceived",
    "PacketsSent",
    "PacketsReceived",
    "TXPacketsPerSecond",
    "RXPacketsPerSecond",
    "TXError",
    "RXError",
    "PSHRetransmitted",
    "PSHRetransmissionAborted",
];

pub const CLIENT_THROUGHPUT_FIELDS: &[&str] = &[
    "Timestamp",
    "Throughput",
    "ThroughputTX",
    "ThroughputRX",
    "TCPDataThroughput",
    "TCPDataThroughputTX",
    "ParallelClientSessions",
    "ActiveConnections",
    "ConnectionsSucceeded",
    "AverageConnectionLatency",
    "BytesSent",
    "BytesReceived",
    "PacketsSent",
    "PacketsReceived",
    "TXPacketsPerSecond",
    "RXPacketsPerSecond",
];

pub const SERVER_CPS_FIELDS: &[&str] = &[
    "Timestamp",
    "Throughput",
    "TCPDataThroughput",
    "ConnectionsAccepted",
    "ConnectionRate",
    "AverageConnectionLatency",
    "SYNReceived",
    "SYN_ACKSent",
    "FIN_ACKSent",
    "FINReceived",
    "BytesSent",
    "BytesReceived",
    "PacketsSent",
    "PacketsReceived",
    "TXPacketsPerSecond",
    "RXPacketsPerSecond",
    "TXError",
    "RXError",
    "TXDroppedPackets",
    "RXDroppedPackets",
    "SYNRetransmitted",
    "PSHRetransmitted",
];

pub const CLIENT_CPS_FIELDS: &[&str] = &[
    "Timestamp",
    "Throughput",
    "ParallelClientSessions",
    "ConnectionsSucceeded",
    "ConnectionsFailed",
    "ConnectionsAccepted",
    "ConnectionRate",
    "AverageConnectionLatency",
    "SYNSent",
    "SYN_ACKReceived",
    "FINSent",
    "FIN_ACKReceived",
    "BytesSent",
    "BytesReceived",
    "PacketsSent",
    "PacketsReceived",
    "TXPacketsPerSecond",
    "RXPacketsPerSecond",
    "TXError",
    "RXError",
];

pub fn allow_list(role: Role, test_type: TestType) -> &'static [&'static str] {
    match (role, test_type) {
        (Role::Server, TestType::Throughput) => SERVER_THROUGHPUT_FIELDS,
        (Role::Client, TestType::Throughput) => CLIENT_THROUGHPUT_FIELDS,
        (Role::Server, TestType::Cps) => SERVER_CPS_FIELDS,
        (Role::Client, TestType::Cps) => CLIENT_CPS_FIELDS,
    }
}

/// Semantic category of a cell, driving its color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CellClass {
    /// Error-like counter with a non-zero value.
    Error,
    /// Error-like counter at zero.
    Success,
    Throughput,
    Latency,
    Connection,
    Volume,
    Plain,
}

impl CellClass {
    pub fn classify(field: &str, value: f64) -> Self {
        if field.contains("Error") || field.contains("Failed") || field.contains("Dropped") {
            if value > 0.0 {
                CellClass::Error
            } else {
                CellClass::Success
            }
        } else if field.contains("Throughput") {
            CellClass::Throughput
        } else if field.contains("Latency") {
            CellClass::Latency
        } else if field.contains("Connections") || field.contains("Rate") {
            CellClass::Connection
        } else if field.contains("Bytes") || field.contains("Packets") {
            CellClass::Volume
        } else {
            CellClass::Plain
        }
    }

    fn style(&self) -> Style {
        match self {
            CellClass::Error => Style::new().red().bold(),
            CellClass::Success => Style::new().green(),
            CellClass::Throughput => Style::new().green().bold(),
            CellClass::Latency => Style::new().yellow(),
            CellClass::Connection => Style::new().blue(),
            CellClass::Volume => Style::new().magenta(),
            CellClass::Plain => Style::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cell {
    pub text: String,
    pub class: CellClass,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsTable {
    pub role: Role,
    pub test_type: TestType,
    /// Raw field names, in allow-list order.
    pub columns: Vec<&'static str>,
    /// Display headers, including the leading `#` column.
    pub headers: Vec<String>,
    /// Each row starts with its 1-based index.
    pub rows: Vec<Vec<Cell>>,
}

/// Allow-listed fields present in the data, in allow-list order.
///
/// Presence is judged on the first snapshot, as the backend emits a fixed field set
/// per test.
pub fn select_columns(history: &[StatSnapshot], role: Role, test_type: TestType) -> Vec<&'static str> {
    let Some(first) = history.first() else {
        return Vec::new();
    };
    allow_list(role, test_type)
        .iter()
        .copied()
        .filter(|field| first.has(field))
        .collect()
}

/// `BytesSent` -> `Bytes Sent`.
pub fn header_name(field: &str) -> String {
    let mut out = String::with_capacity(field.len() + 4);
    for (i, ch) in field.chars().enumerate() {
        if ch.is_ascii_uppercase() && i > 0 {
            out.push(' ');
        }
        out.push(ch);
    }
    out
}

pub fn render(history: &[StatSnapshot], role: Role, test_type: TestType) -> StatsTable {
    let columns = select_columns(history, role, test_type);

    let mut headers = Vec::with_capacity(columns.len() + 1);
    headers.push("#".to_string());
    headers.extend(columns.iter().map(|c| header_name(c)));

    let rows = history
        .iter()
        .enumerate()
        .map(|(index, snapshot)| {
            let mut row = Vec::with_capacity(columns.len() + 1);
            row.push(Cell {
                text: (index + 1).to_string(),
                class: CellClass::Plain,
            });
            for field in &columns {
                let value = snapshot.get(field);
                row.push(Cell {
                    text: format::field_value(field, value),
                    class: CellClass::classify(field, value.map(format::coerce).unwrap_or(0.0)),
                });
            }
            row
        })
        .collect();

    StatsTable {
        role,
        test_type,
        columns,
        headers,
        rows,
    }
}

impl StatsTable {
    /// Column-aligned terminal rendering.
    pub fn to_text(&self, use_color: bool) -> String {
        if self.rows.is_empty() {
            return format!("No {} data available\n", self.role);
        }

        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell.text.chars().count());
            }
        }

        let header_style = Style::new().bold();
        let mut out = String::new();
        let header_line: Vec<String> = self
            .headers
            .iter()
            .zip(&widths)
            .map(|(h, w)| {
                let padded = format!("{:<width$}", h, width = w);
                if use_color {
                    header_style.apply_to(padded).to_string()
                } else {
                    padded
                }
            })
            .collect();
        out.push_str(header_line.join("  ").trim_end());
        out.push('\n');

        let rule_len = widths.iter().sum::<usize>() + 2 * widths.len().saturating_sub(1);
        out.push_str(&"-".repeat(rule_len));
        out.push('\n');

        for row in &self.rows {
            let line: Vec<String> = row
                .iter()
                .zip(&widths)
                .map(|(cell, w)| {
                    let padded = format!("{:<width$}", cell.text, width = w);
                    if use_color {
                        cell.class.style().apply_to(padded).to_string()
                    } else {
                        padded
                    }
                })
                .collect();
            out.push_str(line.join("  ").trim_end());
            out.push('\n');
        }
        out
    }
}
