use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Backend returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Unexpected response shape: {0}")]
    Decode(String),

    #[error("Backend reported an error: {0}")]
    Backend(String),

    #[error("Configuration validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("No test selected")]
    NoTestSelected,

    #[error("Test is not cancellable in status {0}")]
    NotCancellable(String),

    #[error("Invalid API URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl IntoResponse for MonitorError {
    fn into_response(self) -> Response {
        let status = match &self {
            MonitorError::Transport(_) => StatusCode::BAD_GATEWAY,
            MonitorError::Http { .. } => StatusCode::BAD_GATEWAY,
            MonitorError::Decode(_) => StatusCode::BAD_GATEWAY,
            MonitorError::Backend(_) => StatusCode::BAD_GATEWAY,
            MonitorError::Validation(_) => StatusCode::BAD_REQUEST,
            MonitorError::NoTestSelected => StatusCode::CONFLICT,
            MonitorError::NotCancellable(_) => StatusCode::CONFLICT,
            MonitorError::InvalidUrl(_) => StatusCode::INTERNAL_SERVER_ERROR,
            MonitorError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            MonitorError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}
