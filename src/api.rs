//! HTTP client for the test orchestration backend.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::{HTTP_TIMEOUT_SECS, RUN_TIMEOUT_GRACE_SECS};
use crate::error::MonitorError;
use crate::format::coerce;
use crate::logs::BackendLogEntry;
use crate::model::{snapshots_from_value, ActiveTest, Role, StatusUpdate, StatsUpdate, TestStatus, TestType};
use crate::run_config::TestConfig;

pub type ApiResult<T> = Result<T, MonitorError>;

/// One `/api/current_stats` response: parsed histories plus the raw body for export.
#[derive(Debug, Clone, Default)]
pub struct CurrentStats {
    pub update: StatsUpdate,
    pub raw: Value,
}

/// Everything this crate asks of the backend.
#[async_trait]
pub trait MonitorBackend: Send + Sync + 'static {
    async fn active_tests(&self) -> ApiResult<Vec<ActiveTest>>;
    async fn test_status(&self, test_id: &str) -> ApiResult<StatusUpdate>;
    async fn current_stats(&self, test_id: &str) -> ApiResult<CurrentStats>;
    async fn cancel_test(&self, test_id: &str) -> ApiResult<()>;
    async fn run_test_simple(&self, config: &TestConfig) -> ApiResult<Value>;
    async fn logs(&self) -> ApiResult<Vec<BackendLogEntry>>;
    async fn clear_logs(&self) -> ApiResult<()>;
    async fn role_log(&self, role: Role, test_id: &str) -> ApiResult<String>;
}

pub struct HttpBackend {
    base: Url,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base_url: &str) -> ApiResult<Self> {
        // A trailing slash keeps `join` from dropping the last path segment.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base = Url::parse(&normalized)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .pool_max_idle_per_host(4)
            .build()?;
        Ok(Self { base, client })
    }

    pub fn url(&self, path: &str) -> ApiResult<Url> {
        Ok(self.base.join(path.trim_start_matches('/'))?)
    }

    async fn read_json(resp: reqwest::Response) -> ApiResult<Value> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            // The backend reports 4xx with a JSON envelope carrying a message.
            if let Ok(json) = serde_json::from_str::<Value>(&body) {
                if let Some(msg) = json.get("message").and_then(Value::as_str) {
                    return Err(MonitorError::Backend(msg.to_string()));
                }
            }
            return Err(MonitorError::Http {
                status: status.as_u16(),
                body,
            });
        }
        resp.json::<Value>()
            .await
            .map_err(|e| MonitorError::Decode(e.to_string()))
    }

    async fn get_json(&self, path: &str) -> ApiResult<Value> {
        let url = self.url(path)?;
        debug!("GET {}", url);
        let resp = self.client.get(url).send().await?;
        Self::read_json(resp).await
    }

    async fn post_json(&self, path: &str, body: Option<&Value>, timeout: Option<Duration>) -> ApiResult<Value> {
        let url = self.url(path)?;
        debug!("POST {}", url);
        let mut req = self.client.post(url);
        if let Some(body) = body {
            req = req.json(body);
        }
        if let Some(timeout) = timeout {
            req = req.timeout(timeout);
        }
        let resp = req.send().await?;
        Self::read_json(resp).await
    }
}

#[async_trait]
impl MonitorBackend for HttpBackend {
    async fn active_tests(&self) -> ApiResult<Vec<ActiveTest>> {
        let json = self.get_json("/api/active_tests").await?;
        parse_active_tests(&json)
    }

    async fn test_status(&self, test_id: &str) -> ApiResult<StatusUpdate> {
        let json = self.get_json(&format!("/api/test_status/{}", test_id)).await?;
        parse_status_response(&json)
    }

    async fn current_stats(&self, test_id: &str) -> ApiResult<CurrentStats> {
        let json = self.get_json(&format!("/api/current_stats/{}", test_id)).await?;
        let update = parse_stats_response(&json)?;
        Ok(CurrentStats { update, raw: json })
    }

    async fn cancel_test(&self, test_id: &str) -> ApiResult<()> {
        let json = self
            .post_json(&format!("/api/cancel_test/{}", test_id), None, None)
            .await?;
        check_envelope(&json)
    }

    async fn run_test_simple(&self, config: &TestConfig) -> ApiResult<Value> {
        let body = config.to_request_body();
        let timeout = Duration::from_secs(u64::from(config.duration) + RUN_TIMEOUT_GRACE_SECS);
        let json = self
            .post_json("/api/run_test_simple", Some(&body), Some(timeout))
            .await?;
        check_envelope(&json)?;
        Ok(json)
    }

    async fn logs(&self) -> ApiResult<Vec<BackendLogEntry>> {
        let json = self.get_json("/api/logs").await?;
        Ok(crate::logs::parse_backend_logs(&json))
    }

    async fn clear_logs(&self) -> ApiResult<()> {
        let json = self.post_json("/api/logs/clear", None, None).await?;
        check_envelope(&json)
    }

    async fn role_log(&self, role: Role, test_id: &str) -> ApiResult<String> {
        let json = self
            .get_json(&format!("/api/proxy/{}/logs/{}", role, test_id))
            .await?;
        json.get("content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| MonitorError::Decode("log response has no content".to_string()))
    }
}

/// Fail with the backend's message when the envelope says `status != success`.
pub fn check_envelope(json: &Value) -> ApiResult<()> {
    match json.get("status").and_then(Value::as_str) {
        Some("success") | None => Ok(()),
        Some(_) => Err(MonitorError::Backend(
            json.get("message")
                .and_then(Value::as_str)
                .unwrap_or("Unknown error occurred")
                .to_string(),
        )),
    }
}

pub fn parse_active_tests(json: &Value) -> ApiResult<Vec<ActiveTest>> {
    check_envelope(json)?;
    let tests = json
        .get("active_tests")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value::<ActiveTest>(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default();
    Ok(tests)
}

pub fn parse_status_response(json: &Value) -> ApiResult<StatusUpdate> {
    check_envelope(json)?;
    let status = json
        .get("test_status")
        .and_then(Value::as_str)
        .map(TestStatus::parse)
        .ok_or_else(|| MonitorError::Decode("status response has no test_status".to_string()))?;

    Ok(StatusUpdate {
        status,
        progress_percentage: json.get("progress_percentage").map(coerce).unwrap_or(0.0),
        elapsed_time: json.get("elapsed_time").map(coerce).unwrap_or(0.0),
        duration: json.get("duration").map(coerce).unwrap_or(0.0),
        test_type: json
            .get("test_type")
            .and_then(Value::as_str)
            .and_then(TestType::parse),
        error_message: json
            .get("error_message")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

/// Role histories from a current-stats body.
///
/// `current_stats.<role>_stats.raw_data` is preferred; the last
/// `chart_data.stats_history` entry's `<role>` array is the fallback.
pub fn parse_stats_response(json: &Value) -> ApiResult<StatsUpdate> {
    check_envelope(json)?;
    let current = json.get("current_stats");
    let history_tail = json
        .pointer("/chart_data/stats_history")
        .or_else(|| json.get("stats_history"))
        .and_then(Value::as_array)
        .and_then(|h| h.last());

    let role_history = |role: Role| {
        let key = format!("{}_stats", role);
        let from_current = current.and_then(|c| c.get(&key)).and_then(|s| {
            if s.is_array() {
                Some(s)
            } else {
                s.get("raw_data").filter(|r| r.is_array())
            }
        });
        let from_history = history_tail
            .and_then(|entry| entry.get(role.as_str()))
            .filter(|r| r.is_array());
        from_current
            .or(from_history)
            .map(snapshots_from_value)
            .unwrap_or_default()
    };

    Ok(StatsUpdate {
        server: role_history(Role::Server),
        client: role_history(Role::Client),
        test_type: json
            .get("test_type")
            .and_then(Value::as_str)
            .and_then(TestType::parse),
    })
}
