use chrono::{Datelike, NaiveDate};
use serde_json::{Map, Value, json};

use crate::config::ModelConfig;
use crate::error::LLMError;
use crate::types::{RequestMessage, SpeechOptions, is_vision_model};

pub(crate) const CHAT_PATH: &str = "v1/chat/completions";
pub(crate) const SPEECH_PATH: &str = "v1/audio/speech";
pub(crate) const TRANSCRIPTION_PATH: &str = "v1/audio/transcriptions";
pub(crate) const MODELS_PATH: &str = "v1/models";
pub(crate) const SUBSCRIPTION_PATH: &str = "dashboard/billing/subscription";

/// Builds the chat completions body.
///
/// Vision models receive multimodal content verbatim; all other models get the
/// flattened text so text-only endpoints never see image parts.
pub(crate) fn build_chat_body(
    messages: &[RequestMessage],
    config: &ModelConfig,
    stream: bool,
) -> Result<Value, LLMError> {
    let vision = is_vision_model(&config.model);
    let mut converted = Vec::with_capacity(messages.len());
    for message in messages {
        let content = if vision {
            serde_json::to_value(&message.content).map_err(|err| LLMError::Validation {
                message: format!("failed to encode message content: {err}"),
            })?
        } else {
            Value::String(message.text_content())
        };
        converted.push(json!({ "role": message.role, "content": content }));
    }

    let mut body = Map::new();
    body.insert("messages".to_string(), Value::Array(converted));
    body.insert("stream".to_string(), Value::Bool(stream));
    body.insert("model".to_string(), Value::String(config.model.clone()));
    body.insert("temperature".to_string(), Value::from(config.temperature));
    body.insert(
        "presence_penalty".to_string(),
        Value::from(config.presence_penalty),
    );
    body.insert(
        "frequency_penalty".to_string(),
        Value::from(config.frequency_penalty),
    );
    body.insert("top_p".to_string(), Value::from(config.top_p));
    // preview vision models default to a tiny completion budget
    if vision && config.model.contains("preview") {
        body.insert(
            "max_tokens".to_string(),
            Value::from(config.max_tokens.max(4000)),
        );
    }
    Ok(Value::Object(body))
}

pub(crate) fn build_speech_body(options: &SpeechOptions) -> Value {
    let mut body = Map::new();
    body.insert("model".to_string(), Value::String(options.model.clone()));
    body.insert("input".to_string(), Value::String(options.input.clone()));
    body.insert("voice".to_string(), Value::String(options.voice.clone()));
    if let Some(format) = &options.response_format {
        body.insert("response_format".to_string(), Value::String(format.clone()));
    }
    if let Some(speed) = options.speed {
        body.insert("speed".to_string(), Value::from(speed));
    }
    Value::Object(body)
}

/// Azure deployment URLs carry no `v1/` segment and need an explicit api version.
pub(crate) fn make_azure_path(path: &str, api_version: &str) -> String {
    let path = path.replace("v1/", "");
    let separator = if path.contains('?') { '&' } else { '?' };
    format!("{path}{separator}api-version={api_version}")
}

/// Usage query for the current month: first day of the month through tomorrow.
pub(crate) fn billing_usage_path(today: NaiveDate) -> String {
    let start = today.with_day(1).unwrap_or(today);
    let end = today.succ_opt().unwrap_or(today);
    format!(
        "dashboard/billing/usage?start_date={}&end_date={}",
        start.format("%Y-%m-%d"),
        end.format("%Y-%m-%d")
    )
}

/// Rounds a dollar amount to cents.
pub(crate) fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
