use serde_json::{Map, Value, json};

use crate::config::ModelConfig;
use crate::types::{RequestMessage, Role, is_vision_model};

const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// `v1beta/models/<model>:generateContent`, or the SSE variant when streaming.
pub(crate) fn chat_path(model: &str, stream: bool) -> String {
    if stream {
        format!("v1beta/models/{model}:streamGenerateContent?alt=sse")
    } else {
        format!("v1beta/models/{model}:generateContent")
    }
}

/// Builds the `generateContent` body.
///
/// Gemini only knows `user` and `model` turns and rejects two neighbouring turns
/// with the same role, so system prompts become user turns and runs of the same
/// role are merged into one content.
pub(crate) fn build_gemini_body(
    messages: &[RequestMessage],
    config: &ModelConfig,
    safety_threshold: &str,
) -> Value {
    let vision = is_vision_model(&config.model);
    let mut contents: Vec<(&'static str, Vec<Value>)> = Vec::new();

    for message in messages {
        let role = match message.role {
            Role::Assistant => "model",
            Role::System | Role::User => "user",
        };
        let mut parts = Vec::new();
        let text = message.text_content();
        if !text.is_empty() {
            parts.push(json!({ "text": text }));
        }
        if vision {
            parts.extend(message.image_urls().into_iter().filter_map(inline_image));
        }
        if parts.is_empty() {
            continue;
        }

        match contents.last_mut() {
            Some((last_role, last_parts)) if *last_role == role => last_parts.extend(parts),
            _ => contents.push((role, parts)),
        }
    }

    let contents: Vec<Value> = contents
        .into_iter()
        .map(|(role, parts)| json!({ "role": role, "parts": parts }))
        .collect();
    let safety_settings: Vec<Value> = SAFETY_CATEGORIES
        .iter()
        .map(|category| json!({ "category": category, "threshold": safety_threshold }))
        .collect();

    let mut body = Map::new();
    body.insert("contents".to_string(), Value::Array(contents));
    body.insert(
        "generationConfig".to_string(),
        json!({
            "temperature": config.temperature,
            "maxOutputTokens": config.max_tokens,
            "topP": config.top_p,
        }),
    );
    body.insert("safetySettings".to_string(), Value::Array(safety_settings));
    Value::Object(body)
}

/// Turns a `data:<mime>;base64,<payload>` URL into an `inline_data` part.
///
/// Remote URLs are dropped; the API only accepts inline bytes here.
fn inline_image(url: &str) -> Option<Value> {
    let rest = url.strip_prefix("data:")?;
    let (header, data) = rest.split_once(',')?;
    let mime_type = header.strip_suffix(";base64")?;
    Some(json!({
        "inline_data": {
            "mime_type": mime_type,
            "data": data,
        }
    }))
}
