//! SSE parser for streamed chat completions.
//!
//! Turns the raw `reqwest` byte stream into [`StreamEvent`]s. Bytes are buffered
//! until a full line is available, so multi-byte characters split across network
//! chunks decode correctly. The stream is fused after `data: [DONE]`.

use bytes::Bytes;
use futures::stream::Stream;
use serde::Deserialize;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::OpenAIError;
use crate::types::Usage;

/// One decoded event from the completion stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Non-empty text fragment.
    Delta(String),
    /// Provider-side token accounting (sent once, near the end).
    Usage(Usage),
    /// Provider signalled end of stream.
    Done,
}

#[derive(Debug, Deserialize)]
struct FrameRaw {
    #[serde(default)]
    choices: Vec<ChoiceRaw>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    error: Option<ErrorRaw>,
}

#[derive(Debug, Deserialize)]
struct ChoiceRaw {
    #[serde(default)]
    delta: Option<DeltaRaw>,
}

#[derive(Debug, Deserialize)]
struct DeltaRaw {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorRaw {
    message: String,
}

/// Error type of the raw response body stream.
pub type TransportError = reqwest::Error;

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Stream of [`StreamEvent`] decoded from an SSE response body.
pub struct ChatCompletionStream {
    inner: ByteStream,
    buffer: Vec<u8>,
    pending: VecDeque<Result<StreamEvent, OpenAIError>>,
    finished: bool,
}

impl ChatCompletionStream {
    /// Wrap a raw SSE response body.
    pub fn new(
        byte_stream: impl Stream<Item = Result<Bytes, TransportError>> + Send + 'static,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            buffer: Vec::new(),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    /// Decode every complete line currently in the buffer into `pending`.
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            match std::str::from_utf8(&line) {
                Ok(text) => self.decode_line(text.trim()),
                Err(e) => self
                    .pending
                    .push_back(Err(OpenAIError::Parse(format!("Invalid UTF-8 in stream: {}", e)))),
            }
        }
    }

    fn decode_line(&mut self, line: &str) {
        // Blank lines separate events; `event:`, `id:` and comments carry nothing we use
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.trim();

        if data == "[DONE]" {
            self.pending.push_back(Ok(StreamEvent::Done));
            return;
        }

        let frame = match serde_json::from_str::<FrameRaw>(data) {
            Ok(frame) => frame,
            Err(e) => {
                self.pending.push_back(Err(OpenAIError::Parse(format!(
                    "Failed to parse stream frame: {} (data: {})",
                    e,
                    data.chars().take(200).collect::<String>()
                ))));
                return;
            }
        };

        if let Some(error) = frame.error {
            self.pending.push_back(Err(OpenAIError::Api {
                status: 200,
                message: error.message,
            }));
            return;
        }

        let text: String = frame
            .choices
            .into_iter()
            .filter_map(|c| c.delta.and_then(|d| d.content))
            .collect();
        if !text.is_empty() {
            self.pending.push_back(Ok(StreamEvent::Delta(text)));
        }
        if let Some(usage) = frame.usage {
            self.pending.push_back(Ok(StreamEvent::Usage(usage)));
        }
    }
}

impl Stream for ChatCompletionStream {
    type Item = Result<StreamEvent, OpenAIError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.finished {
                return Poll::Ready(None);
            }

            if let Some(item) = this.pending.pop_front() {
                if matches!(item, Ok(StreamEvent::Done)) {
                    this.finished = true;
                    this.pending.clear();
                }
                return Poll::Ready(Some(item));
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.buffer.extend_from_slice(&bytes);
                    this.drain_lines();
                }
                Poll::Ready(Some(Err(e))) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(OpenAIError::Network(e.to_string()))));
                }
                Poll::Ready(None) => {
                    // Body ended; flush a trailing line that had no newline
                    if !this.buffer.is_empty() {
                        this.buffer.push(b'\n');
                        this.drain_lines();
                    }
                    if this.pending.is_empty() {
                        this.finished = true;
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
