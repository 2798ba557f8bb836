//! Files shared between invocations: the last run's result and stats exports.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::LAST_RESULT_FILE;
use crate::error::MonitorError;
use crate::model::{short_id, TestType};

/// What `run` leaves behind for `report`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LastResult {
    pub saved_at: String,
    pub test_type: TestType,
    pub duration: u32,
    /// Body returned by the simple-run endpoint.
    pub response: Value,
}

impl LastResult {
    pub fn new(test_type: TestType, duration: u32, response: Value) -> Self {
        Self {
            saved_at: Utc::now().to_rfc3339(),
            test_type,
            duration,
            response,
        }
    }
}

pub fn save_last_result(dir: &Path, result: &LastResult) -> Result<PathBuf, MonitorError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(LAST_RESULT_FILE);
    let content = serde_json::to_string_pretty(result).map_err(|e| MonitorError::Other(e.to_string()))?;
    std::fs::write(&path, content)?;
    debug!("Saved last result to {:?}", path);
    Ok(path)
}

/// Read the last result. Missing or unreadable files yield `None`.
pub fn load_last_result(dir: &Path) -> Option<LastResult> {
    let path = dir.join(LAST_RESULT_FILE);
    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) => {
            warn!("No last result at {:?}: {}", path, e);
            return None;
        }
    };
    match serde_json::from_str(&content) {
        Ok(result) => Some(result),
        Err(e) => {
            warn!("Ignoring corrupt last result {:?}: {}", path, e);
            None
        }
    }
}

/// `test-<first 8 chars of id>-stats.json`
pub fn default_export_name(test_id: &str) -> String {
    format!("test-{}-stats.json", short_id(test_id))
}

pub fn export_document(test_id: &str, current_stats: &Value, stats_history: &Value) -> Value {
    json!({
        "test_id": test_id,
        "export_time": Utc::now().to_rfc3339(),
        "current_stats": current_stats,
        "stats_history": stats_history,
    })
}

/// Write an export document. A directory `path` gets the default file name inside it.
pub fn export_stats(
    path: &Path,
    test_id: &str,
    current_stats: &Value,
    stats_history: &Value,
) -> Result<PathBuf, MonitorError> {
    let target = if path.is_dir() {
        path.join(default_export_name(test_id))
    } else {
        path.to_path_buf()
    };
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let doc = export_document(test_id, current_stats, stats_history);
    let content = serde_json::to_string_pretty(&doc).map_err(|e| MonitorError::Other(e.to_string()))?;
    std::fs::write(&target, content)?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_name_uses_short_id() {
        assert_eq!(
            default_export_name("1234567890abcdef"),
            "test-12345678-stats.json"
        );
    }

    #[test]
    fn export_document_shape() {
        let doc = export_document("abc", &json!({"x": 1}), &json!([]));
        assert_eq!(doc["test_id"], "abc");
        assert_eq!(doc["current_stats"]["x"], 1);
        assert!(doc["export_time"].is_string());
        assert!(doc["stats_history"].is_array());
    }
}
