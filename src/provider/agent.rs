//! Server-side tool agent and retrieval store, shared by every vendor client.
//!
//! Both endpoints live on the app's own origin; the vendor only decides which
//! base URL and credentials the server should use on the caller's behalf.

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::{ClientContext, ServiceProvider};
use crate::error::{LLMError, classify_status};
use crate::headers::HeaderBuilder;
use crate::http::{post_json_stream_with_headers, post_json_with_headers};
use crate::provider::{ChatProgress, abortable, parse_json, read_success, run_chat};
use crate::stream::{SseDecoder, SseEvent, collect_stream_text};
use crate::types::{AgentChatOptions, CreateRagStoreOptions, FileInfo, RequestMessage};

const AGENT_ROUTE: &str = "/api/langchain/tool/agent";
const RAG_STORE_ROUTE: &str = "/api/langchain/rag/store";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AgentRequest<'a> {
    chat_session_id: &'a str,
    messages: &'a [RequestMessage],
    is_azure: bool,
    azure_api_version: &'a str,
    stream: bool,
    model: &'a str,
    temperature: f32,
    #[serde(rename = "presence_penalty")]
    presence_penalty: f32,
    #[serde(rename = "frequency_penalty")]
    frequency_penalty: f32,
    #[serde(rename = "top_p")]
    top_p: f32,
    base_url: &'a str,
    max_iterations: u32,
    return_intermediate_steps: bool,
    use_tools: &'a [String],
    provider: ServiceProvider,
}

/// One SSE payload from the agent route.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentMessage {
    is_success: bool,
    #[serde(default)]
    message: String,
    #[serde(default)]
    is_tool_message: bool,
    #[serde(default)]
    tool_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RagStoreRequest<'a> {
    session_id: &'a str,
    file_infos: &'a [FileInfo],
    base_url: &'a str,
}

fn agent_error(status: u16, body: &str, retry_after: Option<std::time::Duration>) -> LLMError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value.get("message")?.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("status {status}: {body}"));
    classify_status("agent", status, message, None, retry_after)
}

/// Runs a tool-agent conversation, reporting through the options' callbacks.
///
/// Answer text goes to `on_update`; tool messages go to `on_tool_update` and are not
/// part of the final message.
pub(crate) async fn run_tool_agent(
    context: &ClientContext,
    headers: &HeaderBuilder,
    provider: &'static str,
    service: ServiceProvider,
    base_url: String,
    options: AgentChatOptions,
) {
    let AgentChatOptions {
        chat_session_id,
        messages,
        config,
        agent_config,
        callbacks,
    } = options;

    if agent_config.max_iterations == 0 {
        callbacks.error(&LLMError::Validation {
            message: "max_iterations must be at least 1".to_string(),
        });
        return;
    }

    let model_config = config.apply_to(context.session.model_config());
    let route = if agent_config.use_edge { "edge" } else { "nodejs" };
    let url = context.runtime.route(&format!("{AGENT_ROUTE}/{route}"));
    let access = context.access.clone();

    run_chat(provider, callbacks, |mut progress: ChatProgress| async move {
        let body = AgentRequest {
            chat_session_id: &chat_session_id,
            messages: &messages,
            is_azure: access.provider == ServiceProvider::Azure,
            azure_api_version: &access.azure_api_version,
            stream: config.should_stream(),
            model: &model_config.model,
            temperature: model_config.temperature,
            presence_penalty: model_config.presence_penalty,
            frequency_penalty: model_config.frequency_penalty,
            top_p: model_config.top_p,
            base_url: &base_url,
            max_iterations: agent_config.max_iterations,
            return_intermediate_steps: agent_config.return_intermediate_steps,
            use_tools: &agent_config.use_tools,
            provider: service,
        };
        debug!(provider, url = %url, model = %model_config.model, "sending tool agent request");

        let response = post_json_stream_with_headers(
            context.transport.as_ref(),
            url,
            headers.headers(false),
            &body,
        )
        .await?;
        if !(200..300).contains(&response.status) {
            let retry_after = crate::error::retry_after_from_headers(&response.headers);
            let text = collect_stream_text(response.body, provider).await?;
            return Err(agent_error(response.status, &text, retry_after));
        }

        let mut events = SseDecoder::new(response.body, provider);
        while let Some(event) = events.next().await {
            let data = match event? {
                SseEvent::Done => break,
                SseEvent::Message { data, .. } => data,
            };
            let message: AgentMessage = parse_json(provider, &data)?;
            if !message.is_success {
                return Err(LLMError::provider(provider, message.message));
            }
            if message.is_tool_message {
                progress.tool(message.tool_name.as_deref().unwrap_or_default(), &message.message);
            } else {
                progress.push(&message.message);
            }
        }
        Ok(progress.into_text())
    })
    .await;
}

/// Ingests uploaded files into the session's retrieval store and returns its id.
pub(crate) async fn create_rag_store(
    context: &ClientContext,
    headers: &HeaderBuilder,
    provider: &'static str,
    base_url: String,
    options: CreateRagStoreOptions,
) -> Result<String, LLMError> {
    let CreateRagStoreOptions {
        chat_session_id,
        file_infos,
        on_controller,
    } = options;
    let url = context.runtime.route(RAG_STORE_ROUTE);
    let body = RagStoreRequest {
        session_id: &chat_session_id,
        file_infos: &file_infos,
        base_url: &base_url,
    };
    debug!(provider, files = file_infos.len(), "creating rag store");

    abortable(on_controller.as_ref(), async {
        let response = post_json_with_headers(
            context.transport.as_ref(),
            url,
            headers.headers(false),
            &body,
            None,
        )
        .await?;
        let text = read_success(response, agent_error)?;
        Ok(store_id(&text).unwrap_or_else(|| chat_session_id.clone()))
    })
    .await
}

fn store_id(text: &str) -> Option<String> {
    match serde_json::from_str::<Value>(text).ok()? {
        Value::String(id) if !id.is_empty() => Some(id),
        Value::Object(map) => map
            .get("storeId")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use super::*;
    use crate::config::{AccessStore, RuntimeConfig};
    use crate::testing::{MockReply, MockTransport, context_with};
    use crate::types::{AgentConfig, ChatCallbacks, LLMConfig};

    fn agent_options(callbacks: ChatCallbacks, agent_config: AgentConfig) -> AgentChatOptions {
        AgentChatOptions {
            chat_session_id: "session-1".to_string(),
            messages: vec![RequestMessage::user("weather in Paris?")],
            config: LLMConfig::new("gpt-4").streaming(true),
            agent_config,
            callbacks,
        }
    }

    #[tokio::test]
    async fn tool_messages_are_separated_from_answer_text() {
        let transport = MockTransport::new(vec![MockReply::sse(
            200,
            vec![
                "data: {\"isSuccess\":true,\"isToolMessage\":true,\"toolName\":\"web-search\",\"message\":\"searching\"}\n\n",
                "data: {\"isSuccess\":true,\"isToolMessage\":false,\"message\":\"Sunny\"}\n\n",
                "data: {\"isSuccess\":true,\"message\":\", 21C\"}\n\n",
                "data: [DONE]\n\n",
            ],
        )]);
        let context = context_with(
            transport.clone(),
            AccessStore::default(),
            RuntimeConfig::default(),
            "gpt-4",
        );
        let headers = HeaderBuilder::new(context.access.clone(), context.session.clone());

        let tools = Arc::new(Mutex::new(Vec::new()));
        let finished = Arc::new(Mutex::new(None));
        let (t, f) = (tools.clone(), finished.clone());
        let callbacks = ChatCallbacks::new()
            .on_tool_update(move |name, message| {
                t.lock().unwrap().push(format!("{name}:{message}"))
            })
            .on_finish(move |message| *f.lock().unwrap() = Some(message.to_string()));

        run_tool_agent(
            &context,
            &headers,
            "openai",
            ServiceProvider::OpenAI,
            "https://api.openai.com".to_string(),
            agent_options(callbacks, AgentConfig::default()),
        )
        .await;

        assert_eq!(*tools.lock().unwrap(), vec!["web-search:searching"]);
        assert_eq!(finished.lock().unwrap().as_deref(), Some("Sunny, 21C"));

        let request = &transport.requests()[0];
        assert_eq!(
            request.url,
            "http://localhost:3000/api/langchain/tool/agent/edge"
        );
        let body: Value =
            serde_json::from_slice(request.body_bytes().expect("body")).expect("json");
        assert_eq!(body["chatSessionId"], "session-1");
        assert_eq!(body["maxIterations"], 10);
        assert_eq!(body["isAzure"], false);
        assert_eq!(body["provider"], "OpenAI");
        assert_eq!(body["baseUrl"], "https://api.openai.com");
        assert!(body.get("top_p").is_some());
    }

    #[tokio::test]
    async fn unsuccessful_agent_message_fails_the_request() {
        let transport = MockTransport::new(vec![MockReply::sse(
            200,
            vec!["data: {\"isSuccess\":false,\"message\":\"tool crashed\"}\n\n"],
        )]);
        let context = context_with(
            transport,
            AccessStore::default(),
            RuntimeConfig::default(),
            "gpt-4",
        );
        let headers = HeaderBuilder::new(context.access.clone(), context.session.clone());
        let errors = Arc::new(Mutex::new(Vec::new()));
        let e = errors.clone();
        let callbacks =
            ChatCallbacks::new().on_error(move |err| e.lock().unwrap().push(err.to_string()));

        run_tool_agent(
            &context,
            &headers,
            "openai",
            ServiceProvider::OpenAI,
            String::new(),
            agent_options(callbacks, AgentConfig::default()),
        )
        .await;

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("tool crashed"));
    }

    #[tokio::test]
    async fn zero_iterations_is_rejected_without_a_request() {
        let transport = MockTransport::new(vec![]);
        let context = context_with(
            transport.clone(),
            AccessStore::default(),
            RuntimeConfig::default(),
            "gpt-4",
        );
        let headers = HeaderBuilder::new(context.access.clone(), context.session.clone());
        let errors = Arc::new(Mutex::new(0));
        let e = errors.clone();
        let callbacks = ChatCallbacks::new().on_error(move |err| {
            assert!(matches!(err, LLMError::Validation { .. }));
            *e.lock().unwrap() += 1;
        });
        let agent_config = AgentConfig {
            max_iterations: 0,
            use_edge: false,
            ..AgentConfig::default()
        };

        run_tool_agent(
            &context,
            &headers,
            "openai",
            ServiceProvider::OpenAI,
            String::new(),
            agent_options(callbacks, agent_config),
        )
        .await;

        assert_eq!(*errors.lock().unwrap(), 1);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn rag_store_id_falls_back_to_session() {
        let transport = MockTransport::new(vec![
            MockReply::json(200, json!({"storeId": "store-9"})),
            MockReply::json(200, json!("store-10")),
            MockReply::json(200, json!({"ok": true})),
            MockReply::json(500, json!({"message": "embedding failed"})),
        ]);
        let context = context_with(
            transport.clone(),
            AccessStore::default(),
            RuntimeConfig::default(),
            "gpt-4",
        );
        let headers = HeaderBuilder::new(context.access.clone(), context.session.clone());
        let options = || CreateRagStoreOptions {
            chat_session_id: "session-1".to_string(),
            file_infos: vec![FileInfo {
                original_filename: "notes.pdf".into(),
                file_name: "abc.pdf".into(),
                file_path: "/api/file/abc.pdf".into(),
                size: 1024,
                partial: None,
            }],
            on_controller: None,
        };

        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(
                create_rag_store(&context, &headers, "openai", String::new(), options())
                    .await
                    .expect("store id"),
            );
        }
        assert_eq!(ids, vec!["store-9", "store-10", "session-1"]);

        let err = create_rag_store(&context, &headers, "openai", String::new(), options())
            .await
            .expect_err("server error");
        assert!(err.to_string().contains("embedding failed"));

        let request = &transport.requests()[0];
        assert_eq!(request.url, "http://localhost:3000/api/langchain/rag/store");
        let body: Value =
            serde_json::from_slice(request.body_bytes().expect("body")).expect("json");
        assert_eq!(body["sessionId"], "session-1");
        assert_eq!(body["fileInfos"][0]["originalFilename"], "notes.pdf");
    }
}
