use std::time::Duration;

use serde::Deserialize;

use crate::error::{LLMError, classify_status};

/// Parses error responses returned by the Anthropic Messages API.
///
/// The body looks like `{"type":"error","error":{"type":"...","message":"..."}}`;
/// the inner `type` is used as the classification hint.
pub(crate) fn parse_anthropic_error(
    status: u16,
    body: &str,
    retry_after: Option<Duration>,
) -> LLMError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody { error: Some(error) }) => error.into_llm_error(status, retry_after),
        _ => LLMError::provider("anthropic", format!("status {status}: {body}")),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub(crate) error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorDetail {
    #[serde(rename = "type")]
    kind: Option<String>,
    message: Option<String>,
}

impl ErrorDetail {
    /// Classifies an error object, whether it came with an HTTP status or inside
    /// an `error` stream event.
    pub(crate) fn into_llm_error(self, status: u16, retry_after: Option<Duration>) -> LLMError {
        let mut message = self.message.unwrap_or_else(|| "unknown error".to_string());
        if let Some(kind) = &self.kind {
            message = format!("{message} ({kind})");
        }
        let status = match self.kind.as_deref() {
            Some("authentication_error") | Some("permission_error") if status < 400 => 401,
            Some("rate_limit_error") if status < 400 => 429,
            Some("not_found_error") => 404,
            _ => status,
        };
        classify_status("anthropic", status, message, self.kind.as_deref(), retry_after)
    }
}
