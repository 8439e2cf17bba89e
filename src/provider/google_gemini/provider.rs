use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::debug;

use crate::config::{ClientContext, ModelConfig, ServiceProvider};
use crate::error::{LLMError, retry_after_from_headers};
use crate::headers::HeaderBuilder;
use crate::http::{post_json_stream_with_headers, post_json_with_headers};
use crate::provider::agent::{create_rag_store, run_tool_agent};
use crate::provider::{
    ChatProgress, LLMApi, REQUEST_TIMEOUT, parse_json, read_success, resolve_endpoint, run_chat,
};
use crate::stream::{SseDecoder, SseEvent, collect_stream_text};
use crate::types::{
    AgentChatOptions, ChatOptions, CreateRagStoreOptions, LLMModel, LLMUsage, ModelProvider,
    RequestMessage, SpeechOptions, TranscriptionOptions,
};

use super::error::parse_gemini_error;
use super::request::{build_gemini_body, chat_path};
use super::types::GenerateContentResponse;

const PROVIDER: &str = "google_gemini";
const PROXY_PATH: &str = "/api/google";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Client for the Gemini `generateContent` API.
pub struct GeminiProApi {
    context: ClientContext,
    headers: HeaderBuilder,
}

impl GeminiProApi {
    pub fn new(context: ClientContext) -> Self {
        let headers = HeaderBuilder::new(context.access.clone(), context.session.clone());
        Self { context, headers }
    }

    fn base_url(&self) -> Option<&str> {
        let access = &self.context.access;
        access
            .use_custom_config
            .then_some(access.google_url.as_str())
    }

    pub(crate) fn path(&self, path: &str) -> String {
        resolve_endpoint(
            self.base_url(),
            PROXY_PATH,
            DEFAULT_BASE_URL,
            &self.context.runtime,
            path,
        )
    }

    async fn complete_chat(
        &self,
        messages: Vec<RequestMessage>,
        config: ModelConfig,
        stream: bool,
        mut progress: ChatProgress,
    ) -> Result<String, LLMError> {
        let body = build_gemini_body(
            &messages,
            &config,
            &self.context.access.google_safety_settings,
        );
        let url = self.path(&chat_path(&config.model, stream));
        let headers = self.headers.headers(false);
        debug!(provider = PROVIDER, model = %config.model, url = %url, stream, "sending chat request");

        let transport = self.context.transport.as_ref();
        if !stream {
            let response =
                post_json_with_headers(transport, url, headers, &body, Some(REQUEST_TIMEOUT))
                    .await?;
            let text = read_success(response, parse_gemini_error)?;
            let parsed: GenerateContentResponse = parse_json(PROVIDER, &text)?;
            if let Some(reason) = parsed.block_reason() {
                return Err(blocked(reason));
            }
            let message = parsed.text();
            if message.is_empty() && parsed.finish_reason() == Some("SAFETY") {
                return Err(blocked("SAFETY"));
            }
            return Ok(message);
        }

        let response = post_json_stream_with_headers(transport, url, headers, &body).await?;
        if !(200..300).contains(&response.status) {
            let retry_after = retry_after_from_headers(&response.headers);
            let text = collect_stream_text(response.body, PROVIDER).await?;
            return Err(parse_gemini_error(response.status, &text, retry_after));
        }

        let mut events = SseDecoder::new(response.body, PROVIDER);
        while let Some(event) = events.next().await {
            match event? {
                SseEvent::Done => break,
                SseEvent::Message { data, .. } => {
                    let chunk: GenerateContentResponse = parse_json(PROVIDER, &data)?;
                    if let Some(reason) = chunk.block_reason() {
                        return Err(blocked(reason));
                    }
                    progress.push(&chunk.text());
                }
            }
        }
        Ok(progress.into_text())
    }
}

fn blocked(reason: &str) -> LLMError {
    LLMError::provider(
        PROVIDER,
        format!("message is being blocked for reason: {reason}"),
    )
}

#[async_trait]
impl LLMApi for GeminiProApi {
    async fn chat(&self, options: ChatOptions) {
        let ChatOptions {
            messages,
            config,
            callbacks,
        } = options;
        let stream = config.should_stream();
        let model_config = config.apply_to(self.context.session.model_config());
        run_chat(PROVIDER, callbacks, |progress| {
            self.complete_chat(messages, model_config, stream, progress)
        })
        .await;
    }

    async fn speech(&self, _options: SpeechOptions) -> Result<Vec<u8>, LLMError> {
        Err(LLMError::UnsupportedFeature { feature: "speech" })
    }

    async fn transcription(&self, _options: TranscriptionOptions) -> Result<String, LLMError> {
        Err(LLMError::UnsupportedFeature {
            feature: "transcription",
        })
    }

    async fn tool_agent_chat(&self, options: AgentChatOptions) {
        let base_url = self.base_url().unwrap_or_default().to_string();
        run_tool_agent(
            &self.context,
            &self.headers,
            PROVIDER,
            ServiceProvider::Google,
            base_url,
            options,
        )
        .await;
    }

    async fn create_rag_store(&self, options: CreateRagStoreOptions) -> Result<String, LLMError> {
        let base_url = self.base_url().unwrap_or_default().to_string();
        create_rag_store(&self.context, &self.headers, PROVIDER, base_url, options).await
    }

    async fn usage(&self) -> Result<LLMUsage, LLMError> {
        Ok(LLMUsage {
            used: 0.0,
            total: 0.0,
        })
    }

    async fn models(&self) -> Result<Vec<LLMModel>, LLMError> {
        Ok(Vec::new())
    }

    fn provider(&self) -> ModelProvider {
        ModelProvider::GeminiPro
    }

    fn name(&self) -> &'static str {
        PROVIDER
    }
}
