use std::time::Duration;

use serde::Deserialize;

use crate::error::{LLMError, classify_status};

/// Parses error responses returned by Google Gemini.
///
/// The RPC `status` (`UNAUTHENTICATED`, `RESOURCE_EXHAUSTED`, ...) is appended to
/// the message and doubles as the classification hint.
pub(crate) fn parse_gemini_error(
    status: u16,
    body: &str,
    retry_after: Option<Duration>,
) -> LLMError {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<InnerError>,
    }

    #[derive(Deserialize)]
    struct InnerError {
        message: Option<String>,
        status: Option<String>,
    }

    if let Ok(ErrorBody { error: Some(error) }) = serde_json::from_str::<ErrorBody>(body) {
        let mut message = error.message.unwrap_or_else(|| "unknown error".to_string());
        let hint = error.status.filter(|text| !text.is_empty());
        if let Some(text) = &hint {
            message = format!("{message} ({text})");
        }
        let status = match hint.as_deref() {
            Some("NOT_FOUND") => 404,
            Some("UNAUTHENTICATED") if status == 400 => 401,
            _ => status,
        };
        return classify_status("google_gemini", status, message, hint.as_deref(), retry_after);
    }

    LLMError::provider("google_gemini", format!("status {status}: {body}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_auth_and_rate_limit_errors() {
        let body = r#"{
  "error": {
    "code": 401,
    "message": "API key not valid",
    "status": "UNAUTHENTICATED"
  }
}"#;
        match parse_gemini_error(401, body, None) {
            LLMError::Auth { message } => {
                assert!(message.contains("API key not valid"));
                assert!(message.contains("UNAUTHENTICATED"));
            }
            other => panic!("expected Auth error, got {other:?}"),
        }

        let body = r#"{"error":{"code":429,"message":"quota exhausted","status":"RESOURCE_EXHAUSTED"}}"#;
        match parse_gemini_error(429, body, Some(Duration::from_secs(5))) {
            LLMError::RateLimit {
                message,
                retry_after,
            } => {
                assert!(message.contains("quota exhausted"));
                assert_eq!(retry_after, Some(Duration::from_secs(5)));
            }
            other => panic!("expected RateLimit error, got {other:?}"),
        }
    }

    #[test]
    fn not_found_status_maps_to_model_not_found() {
        let body = r#"{"error":{"code":400,"message":"models/`gemini-ultra` is not found","status":"NOT_FOUND"}}"#;
        match parse_gemini_error(400, body, None) {
            LLMError::ModelNotFound { model, .. } => {
                assert_eq!(model.as_deref(), Some("gemini-ultra"));
            }
            other => panic!("expected ModelNotFound, got {other:?}"),
        }
    }

    #[test]
    fn unparsable_body_is_kept_raw() {
        match parse_gemini_error(503, "upstream unavailable", None) {
            LLMError::Provider { provider, message } => {
                assert_eq!(provider, "google_gemini");
                assert!(message.contains("503"));
            }
            other => panic!("expected Provider error, got {other:?}"),
        }
    }
}
