use serde::Deserialize;

use super::error::ErrorDetail;

/// Non-streaming `v1/messages` response.
#[derive(Debug, Deserialize)]
pub(crate) struct MessageResponse {
    #[serde(default)]
    pub(crate) content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ContentBlock {
    #[serde(rename = "type")]
    pub(crate) kind: String,
    #[serde(default)]
    pub(crate) text: Option<String>,
}

impl MessageResponse {
    /// Concatenated text blocks.
    pub(crate) fn text(&self) -> String {
        self.content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect()
    }
}

/// Events of the Messages SSE stream this client acts on; the rest are ignored.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum StreamEvent {
    ContentBlockDelta { delta: BlockDelta },
    MessageStop,
    Error { error: ErrorDetail },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BlockDelta {
    #[serde(default)]
    pub(crate) text: Option<String>,
}
