use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::LLMError;

/// Receives the controller of a request as soon as the request starts.
pub type ControllerFn = Arc<dyn Fn(AbortController) + Send + Sync>;

type TextUpdateFn = Arc<dyn Fn(&str, &str) + Send + Sync>;
type FinishFn = Arc<dyn Fn(&str) + Send + Sync>;
type ErrorFn = Arc<dyn Fn(&LLMError) + Send + Sync>;

/// Cancellation handle for one in-flight request.
///
/// Clones share state: aborting any clone aborts the request.
#[derive(Debug, Clone, Default)]
pub struct AbortController {
    token: CancellationToken,
}

impl AbortController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.token.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once [`AbortController::abort`] has been called.
    pub async fn aborted(&self) {
        self.token.cancelled().await
    }
}

/// Named hooks through which chat-style operations report progress and outcome.
///
/// `on_update` may fire many times; exactly one of `on_finish` / `on_error` fires
/// afterwards unless the request was aborted, in which case neither does.
///
/// # Examples
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use chatlink::types::ChatCallbacks;
///
/// let done = Arc::new(Mutex::new(String::new()));
/// let sink = done.clone();
/// let callbacks = ChatCallbacks::new()
///     .on_update(|_full, delta| print!("{delta}"))
///     .on_finish(move |message| *sink.lock().unwrap() = message.to_string());
/// callbacks.finish("hello");
/// assert_eq!(*done.lock().unwrap(), "hello");
/// ```
#[derive(Clone, Default)]
pub struct ChatCallbacks {
    update: Option<TextUpdateFn>,
    finish: Option<FinishFn>,
    error: Option<ErrorFn>,
    tool_update: Option<TextUpdateFn>,
    controller: Option<ControllerFn>,
}

impl ChatCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with the text accumulated so far and the newest delta.
    pub fn on_update(mut self, f: impl Fn(&str, &str) + Send + Sync + 'static) -> Self {
        self.update = Some(Arc::new(f));
        self
    }

    /// Called once with the complete assistant message.
    pub fn on_finish(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.finish = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&LLMError) + Send + Sync + 'static) -> Self {
        self.error = Some(Arc::new(f));
        self
    }

    /// Called with `(tool_name, message)` for tool-agent intermediate steps.
    pub fn on_tool_update(mut self, f: impl Fn(&str, &str) + Send + Sync + 'static) -> Self {
        self.tool_update = Some(Arc::new(f));
        self
    }

    pub fn on_controller(mut self, f: impl Fn(AbortController) + Send + Sync + 'static) -> Self {
        self.controller = Some(Arc::new(f));
        self
    }

    pub fn update(&self, full: &str, delta: &str) {
        if let Some(f) = &self.update {
            f(full, delta);
        }
    }

    pub fn finish(&self, message: &str) {
        if let Some(f) = &self.finish {
            f(message);
        }
    }

    pub fn error(&self, err: &LLMError) {
        if let Some(f) = &self.error {
            f(err);
        }
    }

    pub fn tool_update(&self, tool_name: &str, message: &str) {
        if let Some(f) = &self.tool_update {
            f(tool_name, message);
        }
    }

    pub fn controller(&self, controller: AbortController) {
        if let Some(f) = &self.controller {
            f(controller);
        }
    }

    pub(crate) fn controller_fn(&self) -> Option<&ControllerFn> {
        self.controller.as_ref()
    }
}

impl fmt::Debug for ChatCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatCallbacks")
            .field("on_update", &self.update.is_some())
            .field("on_finish", &self.finish.is_some())
            .field("on_error", &self.error.is_some())
            .field("on_tool_update", &self.tool_update.is_some())
            .field("on_controller", &self.controller.is_some())
            .finish()
    }
}
