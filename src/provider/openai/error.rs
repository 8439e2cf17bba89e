use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{LLMError, classify_status};

pub(crate) fn parse_openai_error(
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
        #[serde(rename = "type")]
        kind: Option<String>,
        code: Option<Value>,
    }

    if let Ok(ErrorBody { error: Some(error) }) = serde_json::from_str::<ErrorBody>(body) {
        let code = match &error.code {
            Some(Value::String(code)) => Some(code.clone()),
            Some(Value::Null) | None => error.kind.clone(),
            Some(other) => Some(other.to_string()),
        };
        let mut message = error.message.unwrap_or_else(|| "unknown error".to_string());
        if let Some(code) = &code {
            message = format!("{message} ({code})");
        }
        return classify_status("openai", status, message, code.as_deref(), retry_after);
    }

    match status {
        401 | 403 => LLMError::Auth {
            message: format!("status {status}: {body}"),
        },
        _ => LLMError::provider("openai", format!("status {status}: {body}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_openai_error_envelope() {
        let body = r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error","code":"invalid_api_key"}}"#;
        match parse_openai_error(401, body, None) {
            LLMError::Auth { message } => {
                assert!(message.contains("Incorrect API key"));
                assert!(message.contains("invalid_api_key"));
            }
            other => panic!("expected Auth, got {other:?}"),
        }

        let body = r#"{"error":{"message":"too long","type":"invalid_request_error","code":"context_length_exceeded"}}"#;
        assert!(matches!(
            parse_openai_error(400, body, None),
            LLMError::TokenLimitExceeded { .. }
        ));
    }

    #[test]
    fn falls_back_to_raw_body() {
        match parse_openai_error(502, "<html>bad gateway</html>", None) {
            LLMError::Provider { provider, message } => {
                assert_eq!(provider, "openai");
                assert!(message.contains("status 502"));
            }
            other => panic!("expected Provider, got {other:?}"),
        }
        assert!(matches!(
            parse_openai_error(401, "unauthorized", None),
            LLMError::Auth { .. }
        ));
    }
}
