//! Human-readable rendering of raw backend metrics.
//!
//! Nothing here fails: absent or malformed input renders as `"0 <unit>"`.

use chrono::{Local, TimeZone};
use serde_json::Value;

/// Display unit for a raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    /// Bits per second, shown in Mbps.
    Mbps,
    /// Bytes, shown in KB above 1000.
    Bytes,
    /// Microseconds, shown in ms above 1000.
    Latency,
    /// Generic count with K/M/G scaling.
    Count,
    /// Connections per second.
    ConnRate,
    /// Packets per second.
    Pps,
}

impl Unit {
    pub fn suffix(&self) -> &'static str {
        match self {
            Unit::Mbps => "Mbps",
            Unit::Bytes => "B",
            Unit::Latency => "µs",
            Unit::Count => "",
            Unit::ConnRate => "conn/s",
            Unit::Pps => "pps",
        }
    }
}

/// Parse a JSON value as a finite number. Numeric strings and booleans count.
pub fn parse_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Numeric value with malformed input coerced to 0.
pub fn coerce(value: &Value) -> f64 {
    parse_number(value).unwrap_or(0.0)
}

fn zero(unit: Unit) -> String {
    match unit.suffix() {
        "" => "0".to_string(),
        suffix => format!("0 {}", suffix),
    }
}

/// Format a possibly-missing raw value in the given unit.
pub fn format_value(value: Option<&Value>, unit: Unit) -> String {
    match value.and_then(parse_number) {
        Some(n) => format_number(n, unit),
        None => zero(unit),
    }
}

/// Format an already-numeric value in the given unit.
pub fn format_number(n: f64, unit: Unit) -> String {
    if !n.is_finite() {
        return zero(unit);
    }
    match unit {
        Unit::Mbps => format!("{:.2} Mbps", n / 1_000_000.0),
        Unit::Bytes => {
            if n > 1000.0 {
                format!("{:.1} KB", n / 1000.0)
            } else {
                format!("{} B", plain(n))
            }
        }
        Unit::Latency => {
            if n > 1000.0 {
                format!("{:.1} ms", n / 1000.0)
            } else {
                format!("{} µs", plain(n))
            }
        }
        Unit::Count => count(n),
        Unit::ConnRate => format!("{} conn/s", plain(n)),
        Unit::Pps => format!("{} pps", plain(n)),
    }
}

/// Bits per second to a Mbps display string.
pub fn mbps(bps: f64) -> String {
    format_number(bps, Unit::Mbps)
}

/// Mbps figure already converted (aggregator output) to a display string.
pub fn mbps_figure(mbps: f64) -> String {
    if mbps.is_finite() {
        format!("{:.2} Mbps", mbps)
    } else {
        "0 Mbps".to_string()
    }
}

/// Milliseconds figure to a display string.
pub fn ms_figure(ms: f64) -> String {
    if ms.is_finite() {
        format!("{:.2} ms", ms)
    } else {
        "0 ms".to_string()
    }
}

/// K/M/G scaled count with two decimals.
pub fn count(n: f64) -> String {
    if !n.is_finite() {
        return "0".to_string();
    }
    let abs = n.abs();
    if abs >= 1e9 {
        format!("{:.2}G", n / 1e9)
    } else if abs >= 1e6 {
        format!("{:.2}M", n / 1e6)
    } else if abs >= 1e3 {
        format!("{:.2}K", n / 1e3)
    } else {
        format!("{:.2}", n)
    }
}

/// 1024-based byte size for summary panels.
pub fn human_bytes(bytes: f64) -> String {
    if !bytes.is_finite() || bytes <= 0.0 {
        return "0 B".to_string();
    }
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes;
    let mut idx = 0;
    while size >= 1024.0 && idx < UNITS.len() - 1 {
        size /= 1024.0;
        idx += 1;
    }
    format!("{:.2} {}", size, UNITS[idx])
}

/// Unix seconds (number or numeric string) as local time of day.
pub fn timestamp(value: Option<&Value>) -> String {
    value
        .and_then(parse_number)
        .and_then(|secs| Local.timestamp_opt(secs as i64, 0).single())
        .map(|dt| dt.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Elapsed/remaining seconds as `M:SS` or `H:MM:SS`.
pub fn duration(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

/// Table cell text for a backend field, chosen by field-name heuristics.
pub fn field_value(field: &str, value: Option<&Value>) -> String {
    if let Some(unit) = field_unit(field) {
        if value.and_then(parse_number).is_none() {
            return zero(unit);
        }
    }
    let n = value.map(coerce).unwrap_or(0.0);

    if field.contains("Throughput") && n > 1000.0 {
        format_number(n, Unit::Mbps)
    } else if field.contains("Bytes") && n > 1000.0 {
        format_number(n, Unit::Bytes)
    } else if field.contains("Latency") && n > 1000.0 {
        format_number(n, Unit::Latency)
    } else if field == "Timestamp" {
        timestamp(value)
    } else if field == "ConnectionRate" {
        format!("{} conn/s", raw_text(value))
    } else if field.contains("PacketsPerSecond") {
        format!("{} pps", raw_text(value))
    } else {
        raw_text(value)
    }
}

/// Unit a table column carries, if any.
fn field_unit(field: &str) -> Option<Unit> {
    if field.contains("Throughput") {
        Some(Unit::Mbps)
    } else if field.contains("Bytes") {
        Some(Unit::Bytes)
    } else if field.contains("Latency") {
        Some(Unit::Latency)
    } else if field == "ConnectionRate" {
        Some(Unit::ConnRate)
    } else if field.contains("PacketsPerSecond") {
        Some(Unit::Pps)
    } else {
        None
    }
}

/// Verbatim text of a backend value; missing renders as `0`.
pub fn raw_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "0".to_string(),
        Some(Value::String(s)) if s.is_empty() => "0".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn plain(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{:.0}", n)
    } else {
        format!("{:.2}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn malformed_values_render_as_zero_unit() {
        assert_eq!(format_value(Some(&json!("abc")), Unit::Mbps), "0 Mbps");
        assert_eq!(format_value(None, Unit::Bytes), "0 B");
        assert_eq!(format_value(Some(&json!(null)), Unit::Latency), "0 µs");
        assert_eq!(format_value(Some(&json!({"x": 1})), Unit::ConnRate), "0 conn/s");
        assert_eq!(format_value(Some(&json!("NaN")), Unit::Count), "0");
        assert_eq!(format_number(f64::NAN, Unit::Mbps), "0 Mbps");
    }

    #[test]
    fn throughput_is_mbps_two_decimals() {
        assert_eq!(format_value(Some(&json!("2195408")), Unit::Mbps), "2.20 Mbps");
        assert_eq!(mbps(4_000_000.0), "4.00 Mbps");
    }

    #[test]
    fn bytes_and_latency_scale_above_1000() {
        assert_eq!(format_number(1500.0, Unit::Bytes), "1.5 KB");
        assert_eq!(format_number(900.0, Unit::Bytes), "900 B");
        assert_eq!(format_number(89563.0, Unit::Latency), "89.6 ms");
        assert_eq!(format_number(1000.0, Unit::Latency), "1000 µs");
    }

    #[test]
    fn counts_scale_with_suffix() {
        assert_eq!(count(12.0), "12.00");
        assert_eq!(count(1500.0), "1.50K");
        assert_eq!(count(2_500_000.0), "2.50M");
        assert_eq!(count(3_000_000_000.0), "3.00G");
    }

    #[test]
    fn human_bytes_uses_1024() {
        assert_eq!(human_bytes(0.0), "0 B");
        assert_eq!(human_bytes(2048.0), "2.00 KB");
    }

    #[test]
    fn durations() {
        assert_eq!(duration(65.0), "1:05");
        assert_eq!(duration(3725.0), "1:02:05");
        assert_eq!(duration(-3.0), "0:00");
    }

    #[test]
    fn timestamps() {
        assert_eq!(timestamp(Some(&json!("garbage"))), "-");
        assert_eq!(timestamp(None), "-");
        let shown = timestamp(Some(&json!("1700000000")));
        assert_eq!(shown.len(), 8);
        assert_eq!(shown.matches(':').count(), 2);
    }

    #[test]
    fn field_heuristics() {
        assert_eq!(field_value("ThroughputTX", Some(&json!("2135488"))), "2.14 Mbps");
        assert_eq!(field_value("ThroughputRX", Some(&json!("900"))), "900");
        assert_eq!(field_value("BytesSent", Some(&json!("4500"))), "4.5 KB");
        assert_eq!(field_value("AverageConnectionLatency", Some(&json!("72278"))), "72.3 ms");
        assert_eq!(field_value("ConnectionRate", Some(&json!("10"))), "10 conn/s");
        assert_eq!(field_value("TXPacketsPerSecond", Some(&json!(42))), "42 pps");
        assert_eq!(field_value("TXError", None), "0");
    }

    #[test]
    fn unit_columns_render_malformed_as_zero_with_unit() {
        assert_eq!(field_value("ThroughputTX", Some(&json!("n/a"))), "0 Mbps");
        assert_eq!(field_value("BytesSent", Some(&json!(null))), "0 B");
        assert_eq!(field_value("AverageConnectionLatency", None), "0 µs");
        assert_eq!(field_value("ConnectionRate", Some(&json!("-"))), "0 conn/s");
        assert_eq!(field_value("Timestamp", Some(&json!("bad"))), "-");
    }
}
