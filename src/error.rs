use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;

/// Aggregates every failure mode surfaced by the dispatch layer.
///
/// Chat-style operations hand these to the caller's `on_error` hook; request/response
/// operations (speech, transcription, usage, ...) return them directly. Callers can
/// match on the variant to decide how the failure should be presented.
#[derive(Debug, Error)]
pub enum LLMError {
    /// Represents transport-layer or networking failures.
    #[error("transport error: {message}")]
    Transport { message: String },
    /// Reports invalid or missing credentials, as rejected by the provider.
    #[error("auth failure: {message}")]
    Auth { message: String },
    /// Indicates that the provider throttled the request.
    #[error("rate limited: {message}")]
    RateLimit {
        /// Raw message returned by the upstream provider.
        message: String,
        /// Optional wait duration suggested by the provider.
        retry_after: Option<Duration>,
    },
    /// Indicates that the prompt exceeds the model's context window.
    #[error("token limit exceeded: {message}")]
    TokenLimitExceeded { message: String },
    /// Signals validation failures in the request payload.
    #[error("invalid request: {message}")]
    Validation { message: String },
    /// Declares that an operation is not offered by the bound vendor.
    #[error("feature unsupported: {feature}")]
    UnsupportedFeature { feature: &'static str },
    /// Indicates that a requested model could not be resolved.
    #[error("model not found: {message}")]
    ModelNotFound {
        /// Model identifier extracted from the error payload when available.
        model: Option<String>,
        message: String,
    },
    /// Raised when the access store is missing settings an endpoint needs.
    #[error("invalid configuration for {field}: {reason}")]
    InvalidConfig { field: String, reason: String },
    /// Surfaces cancellations triggered through an [`crate::types::AbortController`].
    #[error("request aborted: {message}")]
    Aborted { message: String },
    /// Wraps provider-defined errors that cannot be normalized.
    #[error("provider {provider} error: {message}")]
    Provider {
        /// Name of the provider, such as `openai`.
        provider: &'static str,
        message: String,
    },
}

impl LLMError {
    /// Creates an [`LLMError::Transport`] from a textual description.
    ///
    /// # Examples
    ///
    /// ```
    /// use chatlink::error::LLMError;
    ///
    /// let err = LLMError::transport("dns lookup failed");
    /// assert!(matches!(err, LLMError::Transport { .. }));
    /// ```
    pub fn transport<T: Into<String>>(message: T) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates an [`LLMError::Provider`] with the given provider name and message.
    ///
    /// # Examples
    ///
    /// ```
    /// use chatlink::error::LLMError;
    ///
    /// let err = LLMError::provider("openai", "bad JSON payload");
    /// assert!(matches!(err, LLMError::Provider { provider: "openai", .. }));
    /// ```
    pub fn provider<T: Into<String>>(provider: &'static str, message: T) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
        }
    }

    /// Creates an [`LLMError::Aborted`] for a request cancelled by its controller.
    pub fn aborted<T: Into<String>>(message: T) -> Self {
        Self::Aborted {
            message: message.into(),
        }
    }

    /// Returns `true` when the error came from a caller-initiated cancellation.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }
}

/// Extracts the `Retry-After` header (in seconds) if present.
///
/// HTTP-date values are ignored; vendors use the numeric form.
pub(crate) fn retry_after_from_headers(headers: &HashMap<String, String>) -> Option<Duration> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("retry-after"))
        .and_then(|(_, value)| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Maps an HTTP status plus a normalized message to the closest error variant.
///
/// Vendor error parsers extract the message and hints; this keeps the status
/// classification identical across vendors.
pub(crate) fn classify_status(
    provider: &'static str,
    status: u16,
    message: String,
    code_hint: Option<&str>,
    retry_after: Option<Duration>,
) -> LLMError {
    if looks_like_token_limit_error(code_hint, &message) {
        return LLMError::TokenLimitExceeded { message };
    }
    match status {
        401 | 403 => LLMError::Auth { message },
        429 => LLMError::RateLimit {
            message,
            retry_after,
        },
        404 => LLMError::ModelNotFound {
            model: extract_model_identifier(&message),
            message,
        },
        400 => LLMError::Validation { message },
        _ => LLMError::Provider { provider, message },
    }
}

/// Returns `true` when an error code or message suggests a context-window overflow.
pub(crate) fn looks_like_token_limit_error(code_hint: Option<&str>, message: &str) -> bool {
    if let Some(code) = code_hint {
        let lower = code.to_ascii_lowercase();
        if matches!(
            lower.as_str(),
            "context_length_exceeded" | "max_context_length_exceeded" | "prompt_tokens_exceeded"
        ) {
            return true;
        }
    }

    let lower_message = message.to_ascii_lowercase();
    const HINTS: [&str; 5] = [
        "context length",
        "context window",
        "token limit",
        "maximum context",
        "prompt is too long",
    ];
    HINTS.iter().any(|needle| lower_message.contains(needle))
}

/// Attempts to extract a quoted model identifier from an error message.
pub(crate) fn extract_model_identifier(message: &str) -> Option<String> {
    for delimiter in ['`', '"', '\''] {
        if let Some(value) = between_delimiters(message, delimiter) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

fn between_delimiters(message: &str, delimiter: char) -> Option<&str> {
    let start = message.find(delimiter)? + delimiter.len_utf8();
    let rest = &message[start..];
    let end = rest.find(delimiter)?;
    Some(&rest[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_maps_common_statuses() {
        let err = classify_status("openai", 401, "bad key".into(), None, None);
        assert!(matches!(err, LLMError::Auth { .. }));

        let err = classify_status(
            "openai",
            429,
            "slow down".into(),
            None,
            Some(Duration::from_secs(3)),
        );
        match err {
            LLMError::RateLimit { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(3)))
            }
            other => panic!("expected RateLimit, got {other:?}"),
        }

        let err = classify_status("openai", 502, "upstream".into(), None, None);
        assert!(matches!(err, LLMError::Provider { provider: "openai", .. }));
    }

    #[test]
    fn classify_detects_token_limit_and_model_names() {
        let err = classify_status(
            "openai",
            400,
            "This model's maximum context length is 8192 tokens".into(),
            None,
            None,
        );
        assert!(matches!(err, LLMError::TokenLimitExceeded { .. }));

        let err = classify_status(
            "openai",
            404,
            "The model `gpt-9` does not exist".into(),
            None,
            None,
        );
        match err {
            LLMError::ModelNotFound { model, .. } => assert_eq!(model.as_deref(), Some("gpt-9")),
            other => panic!("expected ModelNotFound, got {other:?}"),
        }
    }

    #[test]
    fn retry_after_header_is_case_insensitive() {
        let headers = HashMap::from([("Retry-After".to_string(), " 12 ".to_string())]);
        assert_eq!(
            retry_after_from_headers(&headers),
            Some(Duration::from_secs(12))
        );
        let headers = HashMap::from([("retry-after".to_string(), "soon".to_string())]);
        assert_eq!(retry_after_from_headers(&headers), None);
    }
}
