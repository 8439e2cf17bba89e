//! Server-Sent Events decoding shared by every vendor client.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::StreamExt;

use crate::error::LLMError;
use crate::http::HttpBodyStream;

/// Event yielded by [`SseDecoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// A `data:` payload, with the preceding `event:` name when one was sent.
    Message { event: Option<String>, data: String },
    /// Terminal `[DONE]` marker.
    Done,
}

/// Splits a raw byte stream into SSE events.
///
/// Multi-line `data:` fields are joined with `\n`; comments and unknown fields are
/// skipped. A trailing event without a blank-line terminator is still emitted when
/// the body closes.
pub struct SseDecoder {
    body: HttpBodyStream,
    buffer: Vec<u8>,
    event_name: Option<String>,
    data_lines: Vec<Vec<u8>>,
    pending: VecDeque<Result<SseEvent, LLMError>>,
    provider: &'static str,
    stream_closed: bool,
    done_received: bool,
}

impl SseDecoder {
    pub fn new(body: HttpBodyStream, provider: &'static str) -> Self {
        Self {
            body,
            buffer: Vec::new(),
            event_name: None,
            data_lines: Vec::new(),
            pending: VecDeque::new(),
            provider,
            stream_closed: false,
            done_received: false,
        }
    }

    fn field_value(line: &[u8], prefix: &[u8]) -> Vec<u8> {
        let mut value = line[prefix.len()..].to_vec();
        if value.first() == Some(&b' ') {
            value.remove(0);
        }
        value
    }

    fn handle_line(&mut self, line: Vec<u8>) {
        if line.starts_with(b"data:") {
            self.data_lines.push(Self::field_value(&line, b"data:"));
        } else if line.starts_with(b"event:") {
            let name = Self::field_value(&line, b"event:");
            self.event_name = Some(String::from_utf8_lossy(&name).trim().to_string());
        }
    }

    fn flush_event(&mut self) -> Result<(), LLMError> {
        let event = self.event_name.take();
        if self.data_lines.is_empty() {
            return Ok(());
        }

        let joined = self.data_lines.drain(..).collect::<Vec<_>>().join(&b'\n');
        if joined.is_empty() {
            return Ok(());
        }

        let data = String::from_utf8(joined).map_err(|err| {
            LLMError::provider(self.provider, format!("invalid UTF-8 in stream chunk: {err}"))
        })?;

        if data.trim() == "[DONE]" {
            if !self.done_received {
                self.done_received = true;
                self.pending.push_back(Ok(SseEvent::Done));
            }
        } else {
            self.pending.push_back(Ok(SseEvent::Message { event, data }));
        }
        Ok(())
    }

    fn drain_line(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
        buffer.iter().position(|b| *b == b'\n').map(|pos| {
            let mut line: Vec<u8> = buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            line
        })
    }
}

impl Stream for SseDecoder {
    type Item = Result<SseEvent, LLMError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(event) = this.pending.pop_front() {
            return Poll::Ready(Some(event));
        }
        if this.done_received {
            return Poll::Ready(None);
        }

        loop {
            if this.stream_closed {
                if !this.buffer.is_empty() {
                    let line = std::mem::take(&mut this.buffer);
                    this.handle_line(line);
                }
                if let Err(err) = this.flush_event() {
                    return Poll::Ready(Some(Err(err)));
                }
                return Poll::Ready(this.pending.pop_front());
            }

            match this.body.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.buffer.extend_from_slice(&bytes);
                    while let Some(line) = Self::drain_line(&mut this.buffer) {
                        if line.is_empty() {
                            if let Err(err) = this.flush_event() {
                                return Poll::Ready(Some(Err(err)));
                            }
                        } else {
                            this.handle_line(line);
                        }
                    }
                    if let Some(event) = this.pending.pop_front() {
                        return Poll::Ready(Some(event));
                    }
                }
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Some(Err(err))),
                Poll::Ready(None) => this.stream_closed = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Drains a streaming body into a string, used to read error payloads.
pub(crate) async fn collect_stream_text(
    mut body: HttpBodyStream,
    provider: &'static str,
) -> Result<String, LLMError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = body.next().await {
        bytes.extend_from_slice(&chunk?);
    }
    String::from_utf8(bytes).map_err(|err| {
        LLMError::provider(provider, format!("failed to decode stream error body: {err}"))
    })
}
