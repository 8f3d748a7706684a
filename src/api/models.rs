use serde::Serialize;
use serde_json::Value;

use crate::error::{AppError, Result};

/// A scrape request whose tags passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeRequest {
    pub tags: Vec<String>,
}

impl ScrapeRequest {
    /// Parses a raw JSON body of the form `{ "tags": [string, ...] }`.
    ///
    /// Tags are kept exactly as sent: no trimming, dedup or reordering.
    pub fn from_body(body: &[u8]) -> Result<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(AppError::InvalidRequestBody("Request body is required".to_string()));
        }

        let value: Value = serde_json::from_slice(body)
            .map_err(|e| AppError::InvalidRequestBody(format!("Invalid JSON body: {}", e)))?;

        let items = match value.get("tags") {
            None | Some(Value::Null) => return Err(no_tags()),
            Some(Value::Array(items)) if items.is_empty() => return Err(no_tags()),
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(AppError::InvalidRequestBody(
                    "Tags must be an array of strings".to_string(),
                ))
            }
        };

        let tags = items
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| AppError::InvalidRequestBody("Tags must be strings".to_string()))?;

        Ok(ScrapeRequest { tags })
    }
}

fn no_tags() -> AppError {
    AppError::InvalidRequestBody("No tags provided".to_string())
}

#[derive(Debug, Clone, Serialize)]
pub struct ScrapeResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ScrapeResponse {
    pub fn completed(output: String) -> Self {
        ScrapeResponse {
            success: true,
            message: "Scraping completed successfully".to_string(),
            output: Some(output),
            note: None,
        }
    }
}
