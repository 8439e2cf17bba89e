use async_trait::async_trait;
use chrono::Local;
use futures_util::StreamExt;
use tracing::debug;

use crate::config::{ClientContext, ModelConfig, ServiceProvider};
use crate::error::LLMError;
use crate::headers::HeaderBuilder;
use crate::http::{
    FormPart, HttpRequest, post_json_stream_with_headers, post_json_with_headers,
};
use crate::provider::agent::{create_rag_store, run_tool_agent};
use crate::provider::{
    ChatProgress, LLMApi, REQUEST_TIMEOUT, abortable, parse_json, read_success, resolve_endpoint,
    run_chat,
};
use crate::stream::{SseDecoder, SseEvent, collect_stream_text};
use crate::types::{
    AgentChatOptions, ChatOptions, CreateRagStoreOptions, LLMModel, LLMModelProvider, LLMUsage,
    ModelProvider, RequestMessage, SpeechOptions, TranscriptionOptions, default_models,
};

use super::error::parse_openai_error;
use super::request::{
    CHAT_PATH, MODELS_PATH, SPEECH_PATH, SUBSCRIPTION_PATH, TRANSCRIPTION_PATH,
    billing_usage_path, build_chat_body, build_speech_body, make_azure_path, round_cents,
};
use super::types::{
    BillingSubscription, BillingUsage, ChatCompletion, CompletionChunk, ModelList,
    TranscriptionText,
};

const PROVIDER: &str = "openai";
const PROXY_PATH: &str = "/api/openai";
const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Client for OpenAI-compatible endpoints.
///
/// When the access store selects Azure, requests go to the configured deployment
/// URL with the `api-version` query appended.
pub struct ChatGptApi {
    context: ClientContext,
    headers: HeaderBuilder,
}

impl ChatGptApi {
    pub fn new(context: ClientContext) -> Self {
        let headers = HeaderBuilder::new(context.access.clone(), context.session.clone());
        Self { context, headers }
    }

    fn is_azure(&self) -> bool {
        self.context.access.provider == ServiceProvider::Azure
    }

    /// Resolves a vendor path such as `v1/chat/completions` to a full URL.
    pub(crate) fn path(&self, path: &str) -> Result<String, LLMError> {
        let access = &self.context.access;
        let mut path = path.to_string();
        let mut custom = None;
        if access.use_custom_config {
            if self.is_azure() {
                if !access.is_valid_azure() {
                    return Err(LLMError::InvalidConfig {
                        field: "azure".to_string(),
                        reason: "incomplete azure config, url, api key and api version are required"
                            .to_string(),
                    });
                }
                path = make_azure_path(&path, &access.azure_api_version);
                custom = Some(access.azure_url.as_str());
            } else {
                custom = Some(access.openai_url.as_str());
            }
        }
        Ok(resolve_endpoint(
            custom,
            PROXY_PATH,
            DEFAULT_BASE_URL,
            &self.context.runtime,
            &path,
        ))
    }

    async fn complete_chat(
        &self,
        messages: Vec<RequestMessage>,
        config: ModelConfig,
        stream: bool,
        mut progress: ChatProgress,
    ) -> Result<String, LLMError> {
        let body = build_chat_body(&messages, &config, stream)?;
        let url = self.path(CHAT_PATH)?;
        let headers = self.headers.headers(false);
        debug!(provider = PROVIDER, model = %config.model, url = %url, stream, "sending chat request");

        let transport = self.context.transport.as_ref();
        if !stream {
            let response =
                post_json_with_headers(transport, url, headers, &body, Some(REQUEST_TIMEOUT))
                    .await?;
            let text = read_success(response, parse_openai_error)?;
            let completion: ChatCompletion = parse_json(PROVIDER, &text)?;
            return Ok(completion.text());
        }

        let response = post_json_stream_with_headers(transport, url, headers, &body).await?;
        if !(200..300).contains(&response.status) {
            let retry_after = crate::error::retry_after_from_headers(&response.headers);
            let text = collect_stream_text(response.body, PROVIDER).await?;
            return Err(parse_openai_error(response.status, &text, retry_after));
        }

        let mut events = SseDecoder::new(response.body, PROVIDER);
        while let Some(event) = events.next().await {
            match event? {
                SseEvent::Done => break,
                SseEvent::Message { data, .. } => {
                    let chunk: CompletionChunk = parse_json(PROVIDER, &data)?;
                    if let Some(delta) = chunk.delta_text() {
                        progress.push(delta);
                    }
                }
            }
        }
        Ok(progress.into_text())
    }

    /// Credential family and base URL the agent server should call on our behalf.
    fn agent_target(&self) -> (ServiceProvider, String) {
        let access = &self.context.access;
        if self.is_azure() {
            (ServiceProvider::Azure, access.azure_url.clone())
        } else {
            (ServiceProvider::OpenAI, access.openai_url.clone())
        }
    }

    async fn fetch_usage(&self) -> Result<LLMUsage, LLMError> {
        let usage_url = self.path(&billing_usage_path(Local::now().date_naive()))?;
        let subscription_url = self.path(SUBSCRIPTION_PATH)?;
        let transport = self.context.transport.as_ref();
        let (usage, subscription) = tokio::try_join!(
            transport.send(HttpRequest::get(usage_url).with_headers(self.headers.headers(false))),
            transport.send(
                HttpRequest::get(subscription_url).with_headers(self.headers.headers(false))
            ),
        )?;

        if usage.status == 401 {
            return Err(LLMError::Auth {
                message: "unauthorized: the api key or access code is invalid".to_string(),
            });
        }
        if !usage.is_success() || !subscription.is_success() {
            return Err(LLMError::provider(
                PROVIDER,
                format!(
                    "failed to query usage (status {} / {})",
                    usage.status, subscription.status
                ),
            ));
        }

        let usage: BillingUsage = parse_json(PROVIDER, &usage.into_string()?)?;
        let subscription: BillingSubscription =
            parse_json(PROVIDER, &subscription.into_string()?)?;
        Ok(LLMUsage {
            used: usage.total_usage.map(|cents| cents.round() / 100.0).unwrap_or(0.0),
            total: subscription.hard_limit_usd.map(round_cents).unwrap_or(0.0),
        })
    }
}

#[async_trait]
impl LLMApi for ChatGptApi {
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

    async fn speech(&self, options: SpeechOptions) -> Result<Vec<u8>, LLMError> {
        let url = self.path(SPEECH_PATH)?;
        let body = build_speech_body(&options);
        let headers = self.headers.headers(false);
        debug!(provider = PROVIDER, model = %options.model, "sending speech request");
        abortable(options.on_controller.as_ref(), async {
            let response = post_json_with_headers(
                self.context.transport.as_ref(),
                url,
                headers,
                &body,
                Some(REQUEST_TIMEOUT),
            )
            .await?;
            if response.is_success() {
                Ok(response.body)
            } else {
                let retry_after = crate::error::retry_after_from_headers(&response.headers);
                let status = response.status;
                Err(parse_openai_error(status, &response.into_string()?, retry_after))
            }
        })
        .await
    }

    async fn transcription(&self, options: TranscriptionOptions) -> Result<String, LLMError> {
        let url = self.path(TRANSCRIPTION_PATH)?;
        let TranscriptionOptions {
            model,
            file,
            language,
            prompt,
            response_format,
            temperature,
            on_controller,
        } = options;

        let mut parts = vec![
            FormPart::File {
                name: "file".to_string(),
                file_name: file.file_name,
                mime_type: file.mime_type,
                bytes: file.bytes,
            },
            FormPart::Text {
                name: "model".to_string(),
                value: model,
            },
        ];
        let optional = [
            ("language", language),
            ("prompt", prompt),
            ("response_format", response_format.clone()),
            ("temperature", temperature.map(|t| t.to_string())),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                parts.push(FormPart::Text {
                    name: name.to_string(),
                    value,
                });
            }
        }

        let request = HttpRequest::post_multipart(url, parts)
            .with_headers(self.headers.headers(true))
            .with_timeout(REQUEST_TIMEOUT);
        let transport = self.context.transport.as_ref();
        abortable(on_controller.as_ref(), async {
            let response = transport.send(request).await?;
            let text = read_success(response, parse_openai_error)?;
            match response_format.as_deref() {
                None | Some("json") | Some("verbose_json") => {
                    let parsed: TranscriptionText = parse_json(PROVIDER, &text)?;
                    Ok(parsed.text)
                }
                Some(_) => Ok(text),
            }
        })
        .await
    }

    async fn tool_agent_chat(&self, options: AgentChatOptions) {
        let (service, base_url) = self.agent_target();
        run_tool_agent(
            &self.context,
            &self.headers,
            PROVIDER,
            service,
            base_url,
            options,
        )
        .await;
    }

    async fn create_rag_store(&self, options: CreateRagStoreOptions) -> Result<String, LLMError> {
        let (_, base_url) = self.agent_target();
        create_rag_store(&self.context, &self.headers, PROVIDER, base_url, options).await
    }

    async fn usage(&self) -> Result<LLMUsage, LLMError> {
        self.fetch_usage().await
    }

    async fn models(&self) -> Result<Vec<LLMModel>, LLMError> {
        if self.context.access.disable_list_models {
            return Ok(default_models());
        }
        let url = self.path(MODELS_PATH)?;
        let response = self
            .context
            .transport
            .send(HttpRequest::get(url).with_headers(self.headers.headers(false)))
            .await?;
        let text = read_success(response, parse_openai_error)?;
        let list: ModelList = parse_json(PROVIDER, &text)?;
        Ok(list
            .data
            .into_iter()
            .filter(|model| model.id.starts_with("gpt-") || model.id.starts_with("chatgpt-"))
            .map(|model| LLMModel {
                name: model.id,
                available: true,
                provider: LLMModelProvider::openai(),
            })
            .collect())
    }

    fn provider(&self) -> ModelProvider {
        ModelProvider::Gpt
    }

    fn name(&self) -> &'static str {
        PROVIDER
    }
}
