//! Data exchanged between the UI and the provider clients.
//!
//! Messages and options are produced by the caller per request and consumed read-only
//! by whichever vendor client the facade bound.

use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;

mod callbacks;

pub use callbacks::{AbortController, ChatCallbacks, ControllerFn};

/// Closed set of vendor clients the facade can bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ModelProvider {
    /// OpenAI-compatible endpoints, including Azure deployments.
    #[default]
    #[serde(rename = "GPT")]
    Gpt,
    #[serde(rename = "GeminiPro")]
    GeminiPro,
    #[serde(rename = "Claude")]
    Claude,
}

impl ModelProvider {
    /// Resolves a provider name, falling back to [`ModelProvider::Gpt`] for anything
    /// unrecognized.
    ///
    /// # Examples
    ///
    /// ```
    /// use chatlink::types::ModelProvider;
    ///
    /// assert_eq!(ModelProvider::from_name("claude"), ModelProvider::Claude);
    /// assert_eq!(ModelProvider::from_name("llama"), ModelProvider::Gpt);
    /// ```
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "geminipro" | "gemini" | "google" => ModelProvider::GeminiPro,
            "claude" | "anthropic" => ModelProvider::Claude,
            _ => ModelProvider::Gpt,
        }
    }
}

/// Chat role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Message body: plain text or an ordered list of multimodal parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<MultimodalContent>),
}

impl From<&str> for MessageContent {
    fn from(value: &str) -> Self {
        MessageContent::Text(value.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(value: String) -> Self {
        MessageContent::Text(value)
    }
}

/// One part of a multimodal message, in the OpenAI wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MultimodalContent {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    /// `https://` URL or `data:<mime>;base64,<payload>` URL.
    pub url: String,
}

/// Metadata of a file uploaded through [`crate::file::FileApi`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub original_filename: String,
    pub file_name: String,
    pub file_path: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial: Option<String>,
}

/// A chat message as produced by the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMessage {
    pub role: Role,
    pub content: MessageContent,
    #[serde(rename = "fileInfos", default, skip_serializing_if = "Vec::is_empty")]
    pub file_infos: Vec<FileInfo>,
}

impl RequestMessage {
    pub fn new(role: Role, content: impl Into<MessageContent>) -> Self {
        Self {
            role,
            content: content.into(),
            file_infos: Vec::new(),
        }
    }

    pub fn system(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Text of the message; for multimodal content, the first text part.
    pub fn text_content(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .find_map(|part| match part {
                    MultimodalContent::Text { text } => Some(text.clone()),
                    MultimodalContent::ImageUrl { .. } => None,
                })
                .unwrap_or_default(),
        }
    }

    /// URLs of every image part, in order.
    pub fn image_urls(&self) -> Vec<&str> {
        match &self.content {
            MessageContent::Text(_) => Vec::new(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    MultimodalContent::ImageUrl { image_url } => Some(image_url.url.as_str()),
                    MultimodalContent::Text { .. } => None,
                })
                .collect(),
        }
    }
}

/// Per-request overrides layered on top of the session's [`ModelConfig`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LLMConfig {
    pub model: String,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stream: Option<bool>,
}

impl LLMConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn should_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    /// Overlays these overrides on a session configuration.
    ///
    /// An empty `model` keeps the session's model.
    pub fn apply_to(&self, base: ModelConfig) -> ModelConfig {
        ModelConfig {
            model: if self.model.is_empty() {
                base.model
            } else {
                self.model.clone()
            },
            temperature: self.temperature.unwrap_or(base.temperature),
            top_p: self.top_p.unwrap_or(base.top_p),
            max_tokens: self.max_tokens.unwrap_or(base.max_tokens),
            presence_penalty: self.presence_penalty.unwrap_or(base.presence_penalty),
            frequency_penalty: self.frequency_penalty.unwrap_or(base.frequency_penalty),
        }
    }
}

/// Input of [`crate::provider::LLMApi::chat`].
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub messages: Vec<RequestMessage>,
    pub config: LLMConfig,
    pub callbacks: ChatCallbacks,
}

/// Tool-use loop settings forwarded to the agent endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Upper bound on tool-call rounds; must be at least 1.
    pub max_iterations: u32,
    pub return_intermediate_steps: bool,
    /// Names of the tools the agent may call.
    pub use_tools: Vec<String>,
    /// Run on the edge runtime route instead of the node route.
    pub use_edge: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            return_intermediate_steps: true,
            use_tools: Vec::new(),
            use_edge: true,
        }
    }
}

/// Input of [`crate::provider::LLMApi::tool_agent_chat`].
#[derive(Debug, Clone)]
pub struct AgentChatOptions {
    pub chat_session_id: String,
    pub messages: Vec<RequestMessage>,
    pub config: LLMConfig,
    pub agent_config: AgentConfig,
    pub callbacks: ChatCallbacks,
}

/// Input of [`crate::provider::LLMApi::create_rag_store`].
#[derive(Clone, Default)]
pub struct CreateRagStoreOptions {
    pub chat_session_id: String,
    pub file_infos: Vec<FileInfo>,
    pub on_controller: Option<ControllerFn>,
}

impl std::fmt::Debug for CreateRagStoreOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreateRagStoreOptions")
            .field("chat_session_id", &self.chat_session_id)
            .field("file_infos", &self.file_infos)
            .finish_non_exhaustive()
    }
}

/// Input of [`crate::provider::LLMApi::speech`].
#[derive(Clone)]
pub struct SpeechOptions {
    pub model: String,
    pub input: String,
    pub voice: String,
    pub response_format: Option<String>,
    pub speed: Option<f32>,
    pub on_controller: Option<ControllerFn>,
}

impl SpeechOptions {
    pub fn new(model: impl Into<String>, input: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            input: input.into(),
            voice: voice.into(),
            response_format: None,
            speed: None,
            on_controller: None,
        }
    }
}

impl std::fmt::Debug for SpeechOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechOptions")
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("response_format", &self.response_format)
            .field("speed", &self.speed)
            .finish_non_exhaustive()
    }
}

/// Audio clip submitted for transcription.
#[derive(Debug, Clone)]
pub struct AudioFile {
    pub file_name: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Input of [`crate::provider::LLMApi::transcription`].
#[derive(Clone)]
pub struct TranscriptionOptions {
    pub model: String,
    pub file: AudioFile,
    pub language: Option<String>,
    pub prompt: Option<String>,
    /// `json` (the default) or a plain-text format such as `text`, `srt`, `vtt`.
    pub response_format: Option<String>,
    pub temperature: Option<f32>,
    pub on_controller: Option<ControllerFn>,
}

impl TranscriptionOptions {
    pub fn new(model: impl Into<String>, file: AudioFile) -> Self {
        Self {
            model: model.into(),
            file,
            language: None,
            prompt: None,
            response_format: None,
            temperature: None,
            on_controller: None,
        }
    }
}

impl std::fmt::Debug for TranscriptionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscriptionOptions")
            .field("model", &self.model)
            .field("file_name", &self.file.file_name)
            .field("language", &self.language)
            .field("response_format", &self.response_format)
            .finish_non_exhaustive()
    }
}

/// Quota consumed by, and available to, the active credential.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LLMUsage {
    pub used: f64,
    pub total: f64,
}

/// Vendor that serves an [`LLMModel`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LLMModelProvider {
    pub id: String,
    pub provider_name: String,
    pub provider_type: String,
}

impl LLMModelProvider {
    pub fn openai() -> Self {
        Self::new("openai", "OpenAI")
    }

    pub fn google() -> Self {
        Self::new("google", "Google")
    }

    pub fn anthropic() -> Self {
        Self::new("anthropic", "Anthropic")
    }

    fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            provider_name: name.to_string(),
            provider_type: id.to_string(),
        }
    }
}

/// Model entry returned by [`crate::provider::LLMApi::models`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LLMModel {
    pub name: String,
    pub available: bool,
    pub provider: LLMModelProvider,
}

const OPENAI_MODELS: [&str; 6] = [
    "gpt-4o",
    "gpt-4-turbo",
    "gpt-4-vision-preview",
    "gpt-4",
    "gpt-3.5-turbo",
    "whisper-1",
];

const GOOGLE_MODELS: [&str; 3] = ["gemini-pro", "gemini-pro-vision", "gemini-1.5-pro-latest"];

const ANTHROPIC_MODELS: [&str; 3] = [
    "claude-3-opus-20240229",
    "claude-3-sonnet-20240229",
    "claude-3-haiku-20240307",
];

/// Built-in catalogue used when remote model listing is disabled.
pub fn default_models() -> Vec<LLMModel> {
    let entries = OPENAI_MODELS
        .iter()
        .map(|name| (*name, LLMModelProvider::openai()))
        .chain(
            GOOGLE_MODELS
                .iter()
                .map(|name| (*name, LLMModelProvider::google())),
        )
        .chain(
            ANTHROPIC_MODELS
                .iter()
                .map(|name| (*name, LLMModelProvider::anthropic())),
        );
    entries
        .map(|(name, provider)| LLMModel {
            name: name.to_string(),
            available: true,
            provider,
        })
        .collect()
}

/// Models that accept image parts.
pub fn is_vision_model(model: &str) -> bool {
    ["vision", "gpt-4-turbo", "gpt-4o", "claude-3", "gemini-1.5"]
        .iter()
        .any(|keyword| model.contains(keyword))
}
