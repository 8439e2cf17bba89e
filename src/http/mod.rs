use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;
use serde::Serialize;

use crate::error::LLMError;

/// HTTP methods used by the provider clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// One field of a `multipart/form-data` body.
#[derive(Debug, Clone)]
pub enum FormPart {
    /// Plain text field.
    Text { name: String, value: String },
    /// File field carrying raw bytes.
    File {
        name: String,
        file_name: String,
        mime_type: Option<String>,
        bytes: Vec<u8>,
    },
}

/// Request payload understood by [`HttpTransport`] implementations.
#[derive(Debug, Clone)]
pub enum HttpBody {
    /// Pre-encoded bytes, typically serialized JSON.
    Bytes(Vec<u8>),
    /// Multipart form; the transport is responsible for the boundary header.
    Multipart(Vec<FormPart>),
}

/// Minimal HTTP request representation shared across providers.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<HttpBody>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Builds a POST request with a JSON request body.
    ///
    /// # Examples
    ///
    /// ```
    /// use chatlink::http::{HttpMethod, HttpRequest};
    ///
    /// let request = HttpRequest::post_json("https://example.com", br"{}".to_vec());
    /// assert_eq!(request.method, HttpMethod::Post);
    /// assert_eq!(request.headers.get("Content-Type"), Some(&"application/json".to_string()));
    /// ```
    pub fn post_json(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: HashMap::from([("Content-Type".to_string(), "application/json".to_string())]),
            body: Some(HttpBody::Bytes(body)),
            timeout: None,
        }
    }

    /// Builds a POST request carrying a multipart form.
    ///
    /// No `Content-Type` is set here: the boundary is only known to the transport.
    pub fn post_multipart(url: impl Into<String>, parts: Vec<FormPart>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: HashMap::new(),
            body: Some(HttpBody::Multipart(parts)),
            timeout: None,
        }
    }

    /// Builds a body-less GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// Replaces the request headers after construction.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::collections::HashMap;
    /// use chatlink::http::HttpRequest;
    ///
    /// let request = HttpRequest::get("https://example.com")
    ///     .with_headers(HashMap::from([("Authorization".into(), "Bearer test".into())]));
    /// assert_eq!(request.headers.get("Authorization"), Some(&"Bearer test".to_string()));
    /// ```
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Sets a per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the JSON/byte body, if any. Multipart bodies yield `None`.
    pub fn body_bytes(&self) -> Option<&[u8]> {
        match &self.body {
            Some(HttpBody::Bytes(bytes)) => Some(bytes),
            _ => None,
        }
    }
}

/// Minimal HTTP response representation.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Returns `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Converts the body into a UTF-8 string.
    ///
    /// # Examples
    ///
    /// ```
    /// use chatlink::http::HttpResponse;
    ///
    /// let response = HttpResponse { status: 200, headers: Default::default(), body: b"ok".to_vec() };
    /// assert_eq!(response.into_string().unwrap(), "ok");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::Transport`] when the body is not valid UTF-8.
    pub fn into_string(self) -> Result<String, LLMError> {
        String::from_utf8(self.body).map_err(|err| LLMError::transport(err.to_string()))
    }
}

/// HTTP response that carries a streaming body.
pub struct HttpStreamResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: HttpBodyStream,
}

/// Alias for the body stream returned by [`HttpTransport::send_stream`].
pub type HttpBodyStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, LLMError>> + Send>>;

/// Transport abstraction decoupling provider clients from the concrete HTTP client.
///
/// Tests substitute in-memory implementations; production code uses
/// [`reqwest::ReqwestTransport`].
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends a request and resolves when the full response is available.
    ///
    /// # Errors
    ///
    /// Implementations map network failures to [`LLMError::Transport`].
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError>;

    /// Sends a request and returns a streaming body.
    ///
    /// # Errors
    ///
    /// Implementations map network failures to [`LLMError::Transport`].
    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError>;
}

/// Thread-safe handle to a transport implementation.
pub type DynHttpTransport = Arc<dyn HttpTransport>;

fn encode_json<T: Serialize>(body: &T) -> Result<Vec<u8>, LLMError> {
    serde_json::to_vec(body).map_err(|err| LLMError::Validation {
        message: format!("failed to serialize request: {err}"),
    })
}

/// Serializes a body to JSON, attaches headers, and issues a POST request.
///
/// The supplied headers replace the defaults, so callers pass the full set
/// produced by [`crate::headers::get_headers`].
///
/// # Errors
///
/// Returns [`LLMError::Validation`] if serialization fails or forwards the error raised
/// by [`HttpTransport::send`].
pub async fn post_json_with_headers<T: Serialize>(
    transport: &dyn HttpTransport,
    url: impl Into<String>,
    headers: HashMap<String, String>,
    body: &T,
    timeout: Option<Duration>,
) -> Result<HttpResponse, LLMError> {
    let mut request = HttpRequest::post_json(url, encode_json(body)?).with_headers(headers);
    request.timeout = timeout;
    transport.send(request).await
}

/// Issues a JSON POST request and returns the streaming response.
///
/// # Errors
///
/// Returns [`LLMError::Validation`] when serialization fails or propagates any error
/// from [`HttpTransport::send_stream`].
pub async fn post_json_stream_with_headers<T: Serialize>(
    transport: &dyn HttpTransport,
    url: impl Into<String>,
    headers: HashMap<String, String>,
    body: &T,
) -> Result<HttpStreamResponse, LLMError> {
    let request = HttpRequest::post_json(url, encode_json(body)?).with_headers(headers);
    transport.send_stream(request).await
}

pub mod reqwest;
