//! In-memory transport for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::{StreamExt, stream};

use crate::config::{AccessStore, ClientContext, RuntimeConfig, StaticSession};
use crate::error::LLMError;
use crate::http::{HttpRequest, HttpResponse, HttpStreamResponse, HttpTransport};

/// Scripted reply handed out in order by [`MockTransport`].
pub(crate) enum MockReply {
    Full {
        status: u16,
        body: Vec<u8>,
    },
    Stream {
        status: u16,
        chunks: Vec<Vec<u8>>,
        tail: StreamTail,
    },
    Fail(String),
}

pub(crate) enum StreamTail {
    Close,
    Hang,
    Error(String),
}

impl MockReply {
    pub(crate) fn json(status: u16, value: serde_json::Value) -> Self {
        Self::Full {
            status,
            body: value.to_string().into_bytes(),
        }
    }

    pub(crate) fn bytes(status: u16, body: Vec<u8>) -> Self {
        Self::Full { status, body }
    }

    pub(crate) fn sse(status: u16, chunks: Vec<&str>) -> Self {
        Self::stream(status, chunks, StreamTail::Close)
    }

    /// Delivers `chunks` and then never yields again.
    pub(crate) fn sse_then_hang(chunks: Vec<&str>) -> Self {
        Self::stream(200, chunks, StreamTail::Hang)
    }

    pub(crate) fn sse_then_fail(chunks: Vec<&str>, message: &str) -> Self {
        Self::stream(200, chunks, StreamTail::Error(message.to_string()))
    }

    fn stream(status: u16, chunks: Vec<&str>, tail: StreamTail) -> Self {
        Self::Stream {
            status,
            chunks: chunks.into_iter().map(|c| c.as_bytes().to_vec()).collect(),
            tail,
        }
    }
}

/// Records every request and answers from a fixed queue.
#[derive(Default)]
pub(crate) struct MockTransport {
    replies: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub(crate) fn new(replies: Vec<MockReply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    fn next(&self, request: HttpRequest) -> MockReply {
        self.requests.lock().expect("requests lock").push(request);
        self.replies
            .lock()
            .expect("replies lock")
            .pop_front()
            .unwrap_or_else(|| MockReply::Fail("no scripted reply left".to_string()))
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
        match self.next(request) {
            MockReply::Full { status, body } => Ok(HttpResponse {
                status,
                headers: HashMap::new(),
                body,
            }),
            MockReply::Stream { status, chunks, .. } => Ok(HttpResponse {
                status,
                headers: HashMap::new(),
                body: chunks.concat(),
            }),
            MockReply::Fail(message) => Err(LLMError::transport(message)),
        }
    }

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
        let (status, chunks, tail) = match self.next(request) {
            MockReply::Full { status, body } => (status, vec![body], StreamTail::Close),
            MockReply::Stream {
                status,
                chunks,
                tail,
            } => (status, chunks, tail),
            MockReply::Fail(message) => return Err(LLMError::transport(message)),
        };
        let head = stream::iter(chunks.into_iter().map(Ok));
        let body = match tail {
            StreamTail::Close => head.boxed(),
            StreamTail::Hang => head.chain(stream::pending()).boxed(),
            StreamTail::Error(message) => head
                .chain(stream::once(async move { Err(LLMError::transport(message)) }))
                .boxed(),
        };
        Ok(HttpStreamResponse {
            status,
            headers: HashMap::new(),
            body,
        })
    }
}

/// Context with the given access store, runtime, and session model.
pub(crate) fn context_with(
    transport: Arc<MockTransport>,
    access: AccessStore,
    runtime: RuntimeConfig,
    model: &str,
) -> ClientContext {
    ClientContext::new(
        access,
        runtime,
        Arc::new(StaticSession::with_model(model)),
        transport,
    )
}
