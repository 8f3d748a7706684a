use axum::{
    extract::rejection::BytesRejection,
    response::{IntoResponse, Response},
    Json,
    http::StatusCode,
};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("{0}")]
    InvalidRequestBody(String),

    #[error("Scraping failed")]
    ProcessFailure { stderr: String },

    #[error("Scraping timed out")]
    ProcessTimeout { after: Duration, stderr: String },

    #[error("Scraping already running")]
    Busy,

    #[error("{0}")]
    Unhandled(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::InvalidRequestBody(_) => StatusCode::BAD_REQUEST,
            AppError::ProcessFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ProcessTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            AppError::Busy => StatusCode::CONFLICT,
            AppError::Unhandled(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// One-line description for the run status, with at most the last
    /// `STDERR_TAIL_CHARS` characters of any captured stderr.
    pub fn run_summary(&self) -> String {
        match self {
            AppError::ProcessFailure { stderr } => with_tail(self.to_string(), stderr),
            AppError::ProcessTimeout { after, stderr } => {
                with_tail(format!("{} after {:?}", self, after), stderr)
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = self.to_string();

        let details = match self {
            AppError::ProcessFailure { stderr } | AppError::ProcessTimeout { stderr, .. } => Some(stderr),
            _ => None,
        };

        (status, Json(ErrorResponse { error, details })).into_response()
    }
}

pub const STDERR_TAIL_CHARS: usize = 500;

fn with_tail(summary: String, stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        return summary;
    }

    let skip = stderr.chars().count().saturating_sub(STDERR_TAIL_CHARS);
    let tail: String = stderr.chars().skip(skip).collect();
    format!("{}: {}", summary, tail)
}

impl From<BytesRejection> for AppError {
    fn from(rejection: BytesRejection) -> Self {
        AppError::InvalidRequestBody(rejection.body_text())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Unhandled(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_kind() {
        assert_eq!(AppError::MethodNotAllowed.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            AppError::InvalidRequestBody("No tags provided".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::ProcessFailure { stderr: String::new() }.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(AppError::Busy.status(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::Unhandled("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn process_failure_body_carries_stderr_as_details() {
        let err = AppError::ProcessFailure { stderr: "traceback".into() };
        let body = serde_json::to_value(ErrorResponse {
            error: err.to_string(),
            details: Some("traceback".into()),
        })
        .unwrap();

        assert_eq!(body["error"], "Scraping failed");
        assert_eq!(body["details"], "traceback");
    }

    #[test]
    fn details_omitted_when_absent() {
        let body = serde_json::to_value(ErrorResponse {
            error: AppError::MethodNotAllowed.to_string(),
            details: None,
        })
        .unwrap();

        assert_eq!(body, serde_json::json!({ "error": "Method not allowed" }));
    }

    #[test]
    fn timeout_details_carry_partial_stderr() {
        let err = AppError::ProcessTimeout {
            after: Duration::from_secs(30),
            stderr: "fetching page 3\n".into(),
        };
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(err.run_summary(), "Scraping timed out after 30s: fetching page 3");
    }

    #[test]
    fn run_summary_keeps_only_stderr_tail() {
        let stderr = format!("{}END", "x".repeat(2 * STDERR_TAIL_CHARS));
        let summary = AppError::ProcessFailure { stderr }.run_summary();

        assert!(summary.starts_with("Scraping failed: "));
        assert!(summary.ends_with("END"));
        assert_eq!(summary.len(), "Scraping failed: ".len() + STDERR_TAIL_CHARS);
    }

    #[test]
    fn run_summary_without_stderr_is_the_message() {
        assert_eq!(
            AppError::ProcessFailure { stderr: " \n".into() }.run_summary(),
            "Scraping failed"
        );
        assert_eq!(AppError::Unhandled("Failed to start sh".into()).run_summary(), "Failed to start sh");
    }
}
