use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::RuntimeConfig;
use crate::error::{LLMError, retry_after_from_headers};
use crate::http::HttpResponse;
use crate::types::{
    AbortController, AgentChatOptions, ChatCallbacks, ChatOptions, ControllerFn,
    CreateRagStoreOptions, LLMModel, LLMUsage, ModelProvider, SpeechOptions,
    TranscriptionOptions,
};

pub mod agent;
pub mod anthropic;
pub mod google_gemini;
pub mod openai;

/// Timeout applied to non-streaming completions.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Capability contract every vendor client satisfies.
///
/// `chat` and `tool_agent_chat` report through the callbacks carried by their options
/// and never return an error; the remaining operations return `Result`.
#[async_trait]
pub trait LLMApi: Send + Sync {
    /// Sends the conversation and reports deltas, the final message, or the failure.
    async fn chat(&self, options: ChatOptions);

    /// Text to speech; returns the encoded audio.
    async fn speech(&self, options: SpeechOptions) -> Result<Vec<u8>, LLMError>;

    /// Speech to text.
    async fn transcription(&self, options: TranscriptionOptions) -> Result<String, LLMError>;

    /// Chat with a server-side tool-use loop.
    async fn tool_agent_chat(&self, options: AgentChatOptions);

    /// Ingests uploaded files into a retrieval store scoped to a chat session.
    async fn create_rag_store(&self, options: CreateRagStoreOptions) -> Result<String, LLMError>;

    /// Quota consumed and available for the active credential.
    async fn usage(&self) -> Result<LLMUsage, LLMError>;

    /// Models exposed by the vendor.
    async fn models(&self) -> Result<Vec<LLMModel>, LLMError>;

    /// Selector this client was bound for.
    fn provider(&self) -> ModelProvider;

    /// Short vendor tag used in errors and logs.
    fn name(&self) -> &'static str;
}

/// Shared handle to a vendor client.
pub type DynLLMApi = Arc<dyn LLMApi>;

/// Accumulates streamed text and forwards it to `on_update` until the request is
/// aborted.
pub(crate) struct ChatProgress {
    callbacks: ChatCallbacks,
    controller: AbortController,
    text: String,
}

impl ChatProgress {
    pub(crate) fn push(&mut self, delta: &str) {
        if delta.is_empty() || self.controller.is_aborted() {
            return;
        }
        self.text.push_str(delta);
        self.callbacks.update(&self.text, delta);
    }

    pub(crate) fn tool(&self, tool_name: &str, message: &str) {
        if !self.controller.is_aborted() {
            self.callbacks.tool_update(tool_name, message);
        }
    }

    pub(crate) fn into_text(self) -> String {
        self.text
    }
}

/// Runs one chat-style request against its abort controller.
///
/// The controller is handed to `on_controller` before `work` starts. Success goes to
/// `on_finish`, failure to `on_error`; after an abort neither fires and `work` is
/// dropped at its next suspension point.
pub(crate) async fn run_chat<F, Fut>(provider: &'static str, callbacks: ChatCallbacks, work: F)
where
    F: FnOnce(ChatProgress) -> Fut,
    Fut: Future<Output = Result<String, LLMError>>,
{
    let controller = AbortController::new();
    callbacks.controller(controller.clone());

    let progress = ChatProgress {
        callbacks: callbacks.clone(),
        controller: controller.clone(),
        text: String::new(),
    };

    tokio::select! {
        biased;
        _ = controller.aborted() => {
            debug!(provider, "chat request aborted");
        }
        result = work(progress) => {
            if controller.is_aborted() {
                debug!(provider, "chat request aborted after completion");
                return;
            }
            match result {
                Ok(message) => callbacks.finish(&message),
                Err(err) => {
                    debug!(provider, error = %err, "chat request failed");
                    callbacks.error(&err);
                }
            }
        }
    }
}

/// Awaits `work` unless the controller handed to `on_controller` aborts first.
pub(crate) async fn abortable<T, Fut>(
    on_controller: Option<&ControllerFn>,
    work: Fut,
) -> Result<T, LLMError>
where
    Fut: Future<Output = Result<T, LLMError>>,
{
    let controller = AbortController::new();
    if let Some(f) = on_controller {
        f(controller.clone());
    }
    tokio::select! {
        biased;
        _ = controller.aborted() => Err(LLMError::aborted("cancelled by caller")),
        result = work => result,
    }
}

/// Joins a vendor path onto the base URL chosen for the current runtime.
///
/// A non-empty `custom` base wins; otherwise the native shell talks to
/// `public_host` directly and the web build goes through the same-origin
/// `proxy_path`. Bare hosts get an `https://` scheme.
pub(crate) fn resolve_endpoint(
    custom: Option<&str>,
    proxy_path: &str,
    public_host: &str,
    runtime: &RuntimeConfig,
    path: &str,
) -> String {
    let base = match custom.map(str::trim).filter(|base| !base.is_empty()) {
        Some(base) => base.to_string(),
        None if runtime.is_app => public_host.to_string(),
        None => runtime.route(proxy_path),
    };
    let base = base.trim_end_matches('/');
    if base.starts_with("http") {
        format!("{base}/{path}")
    } else {
        format!("https://{base}/{path}")
    }
}

/// Returns the body of a 2xx response or the vendor-classified error.
pub(crate) fn read_success(
    response: HttpResponse,
    parse_error: fn(u16, &str, Option<Duration>) -> LLMError,
) -> Result<String, LLMError> {
    let retry_after = retry_after_from_headers(&response.headers);
    let status = response.status;
    let text = response.into_string()?;
    if (200..300).contains(&status) {
        Ok(text)
    } else {
        Err(parse_error(status, &text, retry_after))
    }
}

pub(crate) fn parse_json<T: DeserializeOwned>(
    provider: &'static str,
    text: &str,
) -> Result<T, LLMError> {
    serde_json::from_str(text)
        .map_err(|err| LLMError::provider(provider, format!("failed to parse response: {err}")))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn endpoint_prefers_custom_then_app_then_proxy() {
        let web = RuntimeConfig::web("http://localhost:3000");
        let app = RuntimeConfig::app();

        assert_eq!(
            resolve_endpoint(Some("my-proxy.dev/"), "/api/openai", "https://api.openai.com", &web, "v1/models"),
            "https://my-proxy.dev/v1/models"
        );
        assert_eq!(
            resolve_endpoint(Some("  "), "/api/openai", "https://api.openai.com", &app, "v1/models"),
            "https://api.openai.com/v1/models"
        );
        assert_eq!(
            resolve_endpoint(None, "/api/openai", "https://api.openai.com", &web, "v1/models"),
            "http://localhost:3000/api/openai/v1/models"
        );
    }

    #[tokio::test]
    async fn run_chat_reports_finish_with_accumulated_text() {
        let updates = Arc::new(Mutex::new(Vec::new()));
        let finished = Arc::new(Mutex::new(None));
        let (u, f) = (updates.clone(), finished.clone());
        let callbacks = ChatCallbacks::new()
            .on_update(move |full, _| u.lock().unwrap().push(full.to_string()))
            .on_finish(move |message| *f.lock().unwrap() = Some(message.to_string()));

        run_chat("test", callbacks, |mut progress| async move {
            progress.push("Hel");
            progress.push("");
            progress.push("lo");
            Ok(progress.into_text())
        })
        .await;

        assert_eq!(*updates.lock().unwrap(), vec!["Hel", "Hello"]);
        assert_eq!(finished.lock().unwrap().as_deref(), Some("Hello"));
    }

    #[tokio::test]
    async fn run_chat_routes_errors_to_on_error() {
        let errors = Arc::new(AtomicUsize::new(0));
        let finishes = Arc::new(AtomicUsize::new(0));
        let (e, f) = (errors.clone(), finishes.clone());
        let callbacks = ChatCallbacks::new()
            .on_error(move |_| {
                e.fetch_add(1, Ordering::SeqCst);
            })
            .on_finish(move |_| {
                f.fetch_add(1, Ordering::SeqCst);
            });

        run_chat("test", callbacks, |_| async { Err(LLMError::transport("down")) }).await;

        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(finishes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn abort_before_completion_suppresses_terminal_callbacks() {
        let finishes = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let (f, e) = (finishes.clone(), errors.clone());
        let callbacks = ChatCallbacks::new()
            .on_controller(|controller| controller.abort())
            .on_finish(move |_| {
                f.fetch_add(1, Ordering::SeqCst);
            })
            .on_error(move |_| {
                e.fetch_add(1, Ordering::SeqCst);
            });

        run_chat("test", callbacks, |_| async { Ok("never".to_string()) }).await;

        assert_eq!(finishes.load(Ordering::SeqCst), 0);
        assert_eq!(errors.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn abortable_returns_aborted_error() {
        let abort_now: ControllerFn = Arc::new(|controller: AbortController| controller.abort());
        let result: Result<(), LLMError> =
            abortable(Some(&abort_now), std::future::pending()).await;
        assert!(result.expect_err("aborted").is_aborted());

        let result = abortable(None, async { Ok::<_, LLMError>(7) }).await;
        assert_eq!(result.expect("value"), 7);
    }
}
