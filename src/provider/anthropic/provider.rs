use std::collections::HashMap;

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

use super::error::parse_anthropic_error;
use super::request::{MESSAGES_PATH, build_claude_body};
use super::types::{MessageResponse, StreamEvent};

const PROVIDER: &str = "anthropic";
const PROXY_PATH: &str = "/api/anthropic";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Client for the Anthropic Messages API.
pub struct ClaudeApi {
    context: ClientContext,
    headers: HeaderBuilder,
}

impl ClaudeApi {
    pub fn new(context: ClientContext) -> Self {
        let headers = HeaderBuilder::new(context.access.clone(), context.session.clone());
        Self { context, headers }
    }

    fn base_url(&self) -> Option<&str> {
        let access = &self.context.access;
        access
            .use_custom_config
            .then_some(access.anthropic_url.as_str())
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

    /// Shared headers plus `anthropic-version`.
    ///
    /// Calls that bypass the proxy also carry the key as `x-api-key`, which is
    /// what the vendor reads.
    fn request_headers(&self) -> HashMap<String, String> {
        let access = &self.context.access;
        let mut headers = self.headers.headers(false);
        headers.insert(
            "anthropic-version".to_string(),
            access.anthropic_api_version.clone(),
        );
        if self.context.runtime.is_app && !access.anthropic_api_key.is_empty() {
            headers.insert(
                "x-api-key".to_string(),
                access.anthropic_api_key.trim().to_string(),
            );
        }
        headers
    }

    async fn complete_chat(
        &self,
        messages: Vec<RequestMessage>,
        config: ModelConfig,
        stream: bool,
        mut progress: ChatProgress,
    ) -> Result<String, LLMError> {
        let body = build_claude_body(&messages, &config, stream)?;
        let url = self.path(MESSAGES_PATH);
        let headers = self.request_headers();
        debug!(provider = PROVIDER, model = %config.model, url = %url, stream, "sending chat request");

        let transport = self.context.transport.as_ref();
        if !stream {
            let response =
                post_json_with_headers(transport, url, headers, &body, Some(REQUEST_TIMEOUT))
                    .await?;
            let text = read_success(response, parse_anthropic_error)?;
            let parsed: MessageResponse = parse_json(PROVIDER, &text)?;
            return Ok(parsed.text());
        }

        let response = post_json_stream_with_headers(transport, url, headers, &body).await?;
        if !(200..300).contains(&response.status) {
            let retry_after = retry_after_from_headers(&response.headers);
            let text = collect_stream_text(response.body, PROVIDER).await?;
            return Err(parse_anthropic_error(response.status, &text, retry_after));
        }

        let mut events = SseDecoder::new(response.body, PROVIDER);
        while let Some(event) = events.next().await {
            let data = match event? {
                SseEvent::Done => break,
                SseEvent::Message { data, .. } => data,
            };
            match parse_json::<StreamEvent>(PROVIDER, &data)? {
                StreamEvent::ContentBlockDelta { delta } => {
                    if let Some(text) = delta.text {
                        progress.push(&text);
                    }
                }
                StreamEvent::MessageStop => break,
                StreamEvent::Error { error } => return Err(error.into_llm_error(200, None)),
                StreamEvent::Other => {}
            }
        }
        Ok(progress.into_text())
    }
}

#[async_trait]
impl LLMApi for ClaudeApi {
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
            ServiceProvider::Anthropic,
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
        Ok(LLMUsage::default())
    }

    async fn models(&self) -> Result<Vec<LLMModel>, LLMError> {
        Ok(Vec::new())
    }

    fn provider(&self) -> ModelProvider {
        ModelProvider::Claude
    }

    fn name(&self) -> &'static str {
        PROVIDER
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use super::*;
    use crate::config::{AccessStore, RuntimeConfig};
    use crate::testing::{MockReply, MockTransport, context_with};
    use crate::types::{ChatCallbacks, LLMConfig};

    fn client(transport: Arc<MockTransport>, runtime: RuntimeConfig) -> ClaudeApi {
        ClaudeApi::new(context_with(
            transport,
            AccessStore::default().with_anthropic_api_key("sk-ant"),
            runtime,
            "claude-3-haiku-20240307",
        ))
    }

    #[derive(Default)]
    struct Outcome {
        deltas: Mutex<Vec<String>>,
        finished: Mutex<Option<String>>,
        errors: Mutex<Vec<String>>,
    }

    fn recording(outcome: &Arc<Outcome>) -> ChatCallbacks {
        let (d, f, e) = (outcome.clone(), outcome.clone(), outcome.clone());
        ChatCallbacks::new()
            .on_update(move |_, delta| d.deltas.lock().unwrap().push(delta.to_string()))
            .on_finish(move |message| *f.finished.lock().unwrap() = Some(message.to_string()))
            .on_error(move |err| e.errors.lock().unwrap().push(err.to_string()))
    }

    fn chat_options(callbacks: ChatCallbacks, stream: bool) -> ChatOptions {
        ChatOptions {
            messages: vec![
                RequestMessage::system("answer in one word"),
                RequestMessage::user("capital of France?"),
            ],
            config: LLMConfig::new("claude-3-haiku-20240307").streaming(stream),
            callbacks,
        }
    }

    #[tokio::test]
    async fn streaming_chat_reads_content_block_deltas() {
        let transport = MockTransport::new(vec![MockReply::sse(
            200,
            vec![
                "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\"}}\n\n",
                "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
                "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Par\"}}\n\n",
                "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"is\"}}\n\n",
                "event: ping\ndata: {\"type\":\"ping\"}\n\n",
                "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
            ],
        )]);
        let api = client(transport.clone(), RuntimeConfig::default());
        let outcome = Arc::new(Outcome::default());

        api.chat(chat_options(recording(&outcome), true)).await;

        assert_eq!(*outcome.deltas.lock().unwrap(), vec!["Par", "is"]);
        assert_eq!(outcome.finished.lock().unwrap().as_deref(), Some("Paris"));

        let request = &transport.requests()[0];
        assert_eq!(request.url, "http://localhost:3000/api/anthropic/v1/messages");
        assert_eq!(
            request.headers.get("anthropic-version").map(String::as_str),
            Some("2023-06-01")
        );
        assert_eq!(
            request.headers.get("Authorization").map(String::as_str),
            Some("Bearer sk-ant")
        );
        assert!(!request.headers.contains_key("x-api-key"));
    }

    #[tokio::test]
    async fn stream_error_event_fails_the_chat() {
        let transport = MockTransport::new(vec![MockReply::sse(
            200,
            vec![
                "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Pa\"}}\n\n",
                "event: error\ndata: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n",
            ],
        )]);
        let api = client(transport, RuntimeConfig::default());
        let outcome = Arc::new(Outcome::default());

        api.chat(chat_options(recording(&outcome), true)).await;

        assert!(outcome.finished.lock().unwrap().is_none());
        let errors = outcome.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Overloaded"));
    }

    #[tokio::test]
    async fn non_streaming_chat_joins_text_blocks() {
        let transport = MockTransport::new(vec![MockReply::json(
            200,
            json!({
                "id": "msg_1",
                "type": "message",
                "content": [
                    {"type": "text", "text": "Paris"},
                    {"type": "text", "text": "."}
                ]
            }),
        )]);
        let api = client(transport.clone(), RuntimeConfig::app());
        let outcome = Arc::new(Outcome::default());

        api.chat(chat_options(recording(&outcome), false)).await;

        assert_eq!(outcome.finished.lock().unwrap().as_deref(), Some("Paris."));
        let request = &transport.requests()[0];
        assert_eq!(request.url, "https://api.anthropic.com/v1/messages");
        assert_eq!(
            request.headers.get("x-api-key").map(String::as_str),
            Some("sk-ant")
        );
    }
}
