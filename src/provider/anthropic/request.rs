use serde_json::{Map, Value, json};

use crate::config::ModelConfig;
use crate::error::LLMError;
use crate::types::{RequestMessage, Role, is_vision_model};

pub(crate) const MESSAGES_PATH: &str = "v1/messages";

/// Text sent where the API insists on a turn but the conversation has none.
const PLACEHOLDER: &str = ";";

/// Builds the Messages API body.
///
/// System prompts are joined into the top-level `system` field. The API wants
/// strictly alternating turns starting with `user`, so neighbouring turns with the
/// same role are merged and a leading assistant turn gets a placeholder user turn
/// in front of it.
pub(crate) fn build_claude_body(
    messages: &[RequestMessage],
    config: &ModelConfig,
    stream: bool,
) -> Result<Value, LLMError> {
    let vision = is_vision_model(&config.model);
    let mut system = Vec::new();
    let mut turns: Vec<(&'static str, Vec<Value>)> = Vec::new();

    for message in messages {
        let role = match message.role {
            Role::System => {
                let text = message.text_content();
                if !text.trim().is_empty() {
                    system.push(text);
                }
                continue;
            }
            Role::User => "user",
            Role::Assistant => "assistant",
        };

        let mut blocks = Vec::new();
        let text = message.text_content();
        if !text.trim().is_empty() {
            blocks.push(json!({ "type": "text", "text": text }));
        }
        if vision {
            blocks.extend(message.image_urls().into_iter().filter_map(image_block));
        }
        if blocks.is_empty() {
            continue;
        }

        match turns.last_mut() {
            Some((last_role, last_blocks)) if *last_role == role => last_blocks.extend(blocks),
            _ => turns.push((role, blocks)),
        }
    }

    if turns.is_empty() {
        return Err(LLMError::Validation {
            message: "claude requests need at least one user or assistant message".to_string(),
        });
    }
    if turns.first().map(|(role, _)| *role) == Some("assistant") {
        turns.insert(
            0,
            ("user", vec![json!({ "type": "text", "text": PLACEHOLDER })]),
        );
    }

    let messages: Vec<Value> = turns
        .into_iter()
        .map(|(role, content)| json!({ "role": role, "content": content }))
        .collect();

    let mut body = Map::new();
    body.insert("model".to_string(), Value::String(config.model.clone()));
    body.insert("messages".to_string(), Value::Array(messages));
    if !system.is_empty() {
        body.insert("system".to_string(), Value::String(system.join("\n\n")));
    }
    body.insert("max_tokens".to_string(), Value::from(config.max_tokens));
    body.insert("temperature".to_string(), Value::from(config.temperature));
    body.insert("top_p".to_string(), Value::from(config.top_p));
    body.insert("stream".to_string(), Value::Bool(stream));
    Ok(Value::Object(body))
}

/// Base64 data URLs become `image` blocks; remote URLs are not accepted.
fn image_block(url: &str) -> Option<Value> {
    let rest = url.strip_prefix("data:")?;
    let (header, data) = rest.split_once(',')?;
    let media_type = header.strip_suffix(";base64")?;
    Some(json!({
        "type": "image",
        "source": {
            "type": "base64",
            "media_type": media_type,
            "data": data,
        }
    }))
}
