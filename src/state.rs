use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::session::MonitorSession;

pub type SharedState = Arc<AppState>;

/// State shared by the dashboard feed handlers.
pub struct AppState {
    pub session: Arc<MonitorSession>,
    pub api_url: String,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(session: Arc<MonitorSession>, api_url: impl Into<String>) -> Self {
        Self {
            session,
            api_url: api_url.into(),
            started_at: Utc::now(),
        }
    }
}
