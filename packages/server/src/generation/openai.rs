//! [`GenerationSource`] backed by OpenAI streamed chat completions.

use async_trait::async_trait;
use futures::StreamExt;
use openai_client::{ChatCompletionStream, ChatRequest, Message, OpenAIClient, StreamEvent};
use tracing::{debug, warn};

use super::adapter::{
    ContextMessage, ContextRole, GenerationContext, GenerationDelta, GenerationError,
    GenerationHandle, GenerationSource,
};

pub struct OpenAIGenerationSource {
    client: OpenAIClient,
}

impl OpenAIGenerationSource {
    pub fn new(client: OpenAIClient) -> Self {
        Self { client }
    }
}

fn to_provider_message(message: ContextMessage) -> Message {
    match message.role {
        ContextRole::System => Message::system(message.content),
        ContextRole::User => Message::user(message.content),
        ContextRole::Assistant => Message::assistant(message.content),
    }
}

#[async_trait]
impl GenerationSource for OpenAIGenerationSource {
    async fn open(
        &self,
        context: GenerationContext,
    ) -> Result<Box<dyn GenerationHandle>, GenerationError> {
        let request = ChatRequest::new(context.model)
            .messages(context.messages.into_iter().map(to_provider_message));

        let stream = self.client.chat_stream(request).await.map_err(|e| {
            warn!(error = %e, "Upstream rejected generation request");
            GenerationError::Open(e.to_string())
        })?;

        Ok(Box::new(OpenAIGenerationHandle::new(stream)))
    }
}

/// Pulls deltas from one completion stream. Dropping the stream releases the
/// HTTP connection, so `close` just drops it.
pub struct OpenAIGenerationHandle {
    stream: Option<ChatCompletionStream>,
    completion_tokens: Option<i64>,
}

impl OpenAIGenerationHandle {
    pub fn new(stream: ChatCompletionStream) -> Self {
        Self {
            stream: Some(stream),
            completion_tokens: None,
        }
    }
}

#[async_trait]
impl GenerationHandle for OpenAIGenerationHandle {
    async fn next(&mut self) -> GenerationDelta {
        loop {
            let Some(stream) = self.stream.as_mut() else {
                return GenerationDelta::done().with_usage(self.completion_tokens);
            };

            match stream.next().await {
                Some(Ok(StreamEvent::Delta(text))) => return GenerationDelta::text(text),
                Some(Ok(StreamEvent::Usage(usage))) => {
                    debug!(
                        prompt_tokens = usage.prompt_tokens,
                        completion_tokens = usage.completion_tokens,
                        "Provider usage reported"
                    );
                    self.completion_tokens = Some(i64::from(usage.completion_tokens));
                }
                Some(Ok(StreamEvent::Done)) | None => {
                    self.close();
                    return GenerationDelta::done().with_usage(self.completion_tokens);
                }
                Some(Err(e)) => {
                    self.close();
                    return GenerationDelta::failed(e.to_string());
                }
            }
        }
    }

    fn close(&mut self) {
        self.stream = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use openai_client::TransportError;

    fn handle_for(chunks: &[&'static [u8]]) -> OpenAIGenerationHandle {
        let items: Vec<Result<Bytes, TransportError>> =
            chunks.iter().map(|c| Ok(Bytes::from_static(c))).collect();
        OpenAIGenerationHandle::new(ChatCompletionStream::new(futures::stream::iter(items)))
    }

    #[tokio::test]
    async fn test_maps_deltas_and_reports_usage_on_done() {
        let mut handle = handle_for(&[
            b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
            b"data: {\"choices\":[],\"usage\":{\"prompt_tokens\":9,\"completion_tokens\":1,\"total_tokens\":10}}\n\n",
            b"data: [DONE]\n\n",
        ]);

        assert_eq!(handle.next().await, GenerationDelta::text("Hi"));
        assert_eq!(handle.next().await, GenerationDelta::done().with_usage(Some(1)));
        // Keeps reporting done after the terminal delta
        assert!(handle.next().await.done);
    }

    #[tokio::test]
    async fn test_provider_error_is_terminal_delta() {
        let mut handle = handle_for(&[
            b"data: {\"choices\":[{\"delta\":{\"content\":\"par\"}}]}\n\n",
            b"data: {\"error\":{\"message\":\"overloaded\"}}\n\n",
        ]);

        assert_eq!(handle.next().await.text, "par");
        let failed = handle.next().await;
        assert!(failed.error.unwrap().contains("overloaded"));
        assert!(handle.next().await.done);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut handle = handle_for(&[b"data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n\n"]);
        handle.close();
        handle.close();
        assert!(handle.next().await.done);
    }
}
