//! Streamed reply pipeline.
//!
//! One [`StreamingPipeline::start`] call drives one generation:
//!
//! ```text
//! admit ──(quota denied)──▶ QuotaExceeded           nothing opened
//!   │
//! start ──(open failed)───▶ Upstream                nothing opened
//!   │
//! STREAMING ── delta ─▶ emit chunk, accumulate
//!   │ done | error | timeout | consumer gone
//!   ▼
//! FINALIZING ─▶ persist, touch chat, bill ─▶ final chunk {done: true}
//! ```
//!
//! A spawned driving task exclusively owns the `PendingGeneration`. The
//! accumulator is consumed by `finalize`, so it can only ever run once no
//! matter how many terminal deltas the provider sends. Dropping the
//! [`ChunkStream`] cancels the run; whatever was already emitted is still
//! saved and billed.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

use super::adapter::{GenerationContext, GenerationHandle, GenerationSource};
use super::tokens::estimate_tokens;
use crate::common::{ChatId, ChatMessageId, UserId};
use crate::domains::chat::{ChatError, ChatRole, NewChatMessage};
use crate::kernel::{ChatRepository, QuotaService};

/// Default bound on one generation, start to last delta.
pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(120);

pub const TIMEOUT_ERROR: &str = "generation timed out";

/// Chunks buffered between the driving task and the consumer.
const CHUNK_BUFFER: usize = 16;

/// Unit of the streamed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamChunk {
    pub delta: String,
    pub message_id: ChatMessageId,
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StreamChunk {
    fn delta(message_id: ChatMessageId, text: String) -> Self {
        Self {
            delta: text,
            message_id,
            done: false,
            total_tokens: None,
            error: None,
        }
    }

    fn last(message_id: ChatMessageId, total_tokens: i64, error: Option<String>) -> Self {
        Self {
            delta: String::new(),
            message_id,
            done: true,
            total_tokens: Some(total_tokens),
            error,
        }
    }
}

/// Where the finished text goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeTarget {
    /// New assistant message with a pre-generated id.
    Insert { message_id: ChatMessageId },
    /// Replace an existing message's content in place.
    Update { message_id: ChatMessageId },
}

impl FinalizeTarget {
    pub fn message_id(&self) -> ChatMessageId {
        match self {
            FinalizeTarget::Insert { message_id } | FinalizeTarget::Update { message_id } => {
                *message_id
            }
        }
    }
}

/// Everything `start` needs besides the admission.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub chat_id: ChatId,
    pub target: FinalizeTarget,
    pub context: GenerationContext,
    /// Prompt size billed together with the completion.
    pub prompt_tokens: i64,
}

/// Proof that the capacity check passed. Only [`StreamingPipeline::admit`]
/// creates one.
#[derive(Debug)]
pub struct Admission {
    identity: UserId,
}

impl Admission {
    pub fn identity(&self) -> UserId {
        self.identity
    }
}

#[derive(Clone)]
pub struct StreamingPipeline {
    source: Arc<dyn GenerationSource>,
    repository: Arc<dyn ChatRepository>,
    quota: Arc<dyn QuotaService>,
    timeout: Duration,
}

impl StreamingPipeline {
    pub fn new(
        source: Arc<dyn GenerationSource>,
        repository: Arc<dyn ChatRepository>,
        quota: Arc<dyn QuotaService>,
    ) -> Self {
        Self {
            source,
            repository,
            quota,
            timeout: DEFAULT_GENERATION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Capacity check. An unlimited allowance always passes.
    pub async fn admit(&self, identity: UserId) -> Result<Admission, ChatError> {
        let capacity = self.quota.check_capacity(identity).await?;
        if !capacity.has_capacity() {
            info!(
                user_id = %identity,
                used = capacity.used,
                limit = capacity.limit,
                "Generation rejected: quota exceeded"
            );
            return Err(ChatError::QuotaExceeded {
                used: capacity.used,
                limit: capacity.limit,
            });
        }
        Ok(Admission { identity })
    }

    /// Open the upstream call and spawn the driving task.
    ///
    /// An open failure is returned here; nothing is persisted or billed.
    pub async fn start(
        &self,
        admission: Admission,
        request: GenerationRequest,
    ) -> Result<ChunkStream, ChatError> {
        let GenerationRequest {
            chat_id,
            target,
            context,
            prompt_tokens,
        } = request;
        let message_id = target.message_id();
        let model = context.model.clone();

        let handle = self.source.open(context).await.map_err(|e| {
            warn!(chat_id = %chat_id, error = %e, "Generation failed to open");
            ChatError::Upstream(e.to_string())
        })?;

        info!(
            user_id = %admission.identity,
            chat_id = %chat_id,
            message_id = %message_id,
            "Generation started"
        );

        let (chunks, receiver) = mpsc::channel(CHUNK_BUFFER);
        let cancel = CancellationToken::new();

        let run = GenerationRun {
            handle,
            pending: PendingGeneration::new(
                admission.identity,
                chat_id,
                target,
                model,
                prompt_tokens,
            ),
            chunks,
            cancel: cancel.clone(),
            deadline: Instant::now() + self.timeout,
            repository: self.repository.clone(),
            quota: self.quota.clone(),
        };
        tokio::spawn(run.drive());

        Ok(ChunkStream {
            message_id,
            chunks: ReceiverStream::new(receiver),
            _cancel_on_drop: cancel.drop_guard(),
        })
    }
}

/// Consumer side of one run. Dropping it cancels the generation.
pub struct ChunkStream {
    message_id: ChatMessageId,
    chunks: ReceiverStream<StreamChunk>,
    _cancel_on_drop: DropGuard,
}

impl ChunkStream {
    /// Id the finished message is (or will be) stored under.
    pub fn message_id(&self) -> ChatMessageId {
        self.message_id
    }
}

impl Stream for ChunkStream {
    type Item = StreamChunk;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().chunks).poll_next(cx)
    }
}

/// In-flight accumulator. Only the driving task holds it.
#[derive(Debug)]
struct PendingGeneration {
    identity: UserId,
    chat_id: ChatId,
    target: FinalizeTarget,
    model: String,
    text: String,
    estimated_tokens: i64,
    provider_tokens: Option<i64>,
    prompt_tokens: i64,
}

/// What finalize did, for the closing chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Finalized {
    total_tokens: i64,
    error: Option<String>,
}

impl PendingGeneration {
    fn new(
        identity: UserId,
        chat_id: ChatId,
        target: FinalizeTarget,
        model: String,
        prompt_tokens: i64,
    ) -> Self {
        Self {
            identity,
            chat_id,
            target,
            model,
            text: String::new(),
            estimated_tokens: 0,
            provider_tokens: None,
            prompt_tokens,
        }
    }

    fn append(&mut self, fragment: &str) {
        self.text.push_str(fragment);
        self.estimated_tokens = estimate_tokens(&self.text);
    }

    fn record_provider_usage(&mut self, completion_tokens: i64) {
        self.provider_tokens = Some(completion_tokens);
    }

    /// Completion size; the provider's figure wins when it sent one.
    fn completion_tokens(&self) -> i64 {
        self.provider_tokens.unwrap_or(self.estimated_tokens)
    }

    /// Persist the text, touch the chat, then bill.
    ///
    /// A new message is always inserted, even empty, so the id carried by
    /// every chunk resolves to a stored row. A regenerated message keeps its
    /// old content when nothing was generated. Billing is attempted even
    /// when persisting failed.
    async fn finalize(
        self,
        repository: &dyn ChatRepository,
        quota: &dyn QuotaService,
    ) -> Finalized {
        let total_tokens = self.completion_tokens();
        let message_id = self.target.message_id();
        let mut errors = Vec::new();

        let persisted = match self.target {
            FinalizeTarget::Insert { message_id } => Some(
                repository
                    .save_message(NewChatMessage {
                        id: message_id,
                        chat_id: self.chat_id,
                        role: ChatRole::Assistant,
                        content: self.text.clone(),
                        tokens: total_tokens,
                        model: Some(self.model.clone()),
                    })
                    .await
                    .map(|_| ()),
            ),
            FinalizeTarget::Update { .. } if self.text.is_empty() => None,
            FinalizeTarget::Update { message_id } => Some(
                repository
                    .update_message(message_id, &self.text, total_tokens)
                    .await,
            ),
        };

        match persisted {
            Some(Ok(())) => {
                if let Err(e) = repository.touch_chat(self.chat_id).await {
                    warn!(chat_id = %self.chat_id, error = %e, "Failed to touch chat");
                }
            }
            Some(Err(e)) => {
                error!(
                    user_id = %self.identity,
                    chat_id = %self.chat_id,
                    message_id = %message_id,
                    error = %e,
                    "Failed to persist generated message; usage is still billed"
                );
                errors.push(format!("failed to save message: {}", e));
            }
            None => debug!(message_id = %message_id, "Empty regeneration; content kept"),
        }

        let billed = total_tokens + self.prompt_tokens;
        if let Err(e) = quota.increment_usage(self.identity, billed).await {
            error!(
                user_id = %self.identity,
                message_id = %message_id,
                tokens = billed,
                error = %e,
                "Failed to record usage"
            );
            errors.push(format!("failed to record usage: {}", e));
        }

        Finalized {
            total_tokens,
            error: (!errors.is_empty()).then(|| errors.join("; ")),
        }
    }
}

enum Outcome {
    Completed,
    Failed(String),
    TimedOut,
    Cancelled,
}

struct GenerationRun {
    handle: Box<dyn GenerationHandle>,
    pending: PendingGeneration,
    chunks: mpsc::Sender<StreamChunk>,
    cancel: CancellationToken,
    deadline: Instant,
    repository: Arc<dyn ChatRepository>,
    quota: Arc<dyn QuotaService>,
}

impl GenerationRun {
    async fn drive(self) {
        let GenerationRun {
            mut handle,
            mut pending,
            chunks,
            cancel,
            deadline,
            repository,
            quota,
        } = self;
        let message_id = pending.target.message_id();

        let outcome = loop {
            let delta = tokio::select! {
                _ = cancel.cancelled() => break Outcome::Cancelled,
                next = tokio::time::timeout_at(deadline, handle.next()) => match next {
                    Ok(delta) => delta,
                    Err(_) => break Outcome::TimedOut,
                },
            };

            if let Some(tokens) = delta.usage {
                pending.record_provider_usage(tokens);
            }

            if !delta.text.is_empty() {
                let chunk = StreamChunk::delta(message_id, delta.text.clone());
                let sent = tokio::select! {
                    _ = cancel.cancelled() => false,
                    sent = chunks.send(chunk) => sent.is_ok(),
                };
                if !sent {
                    break Outcome::Cancelled;
                }
                pending.append(&delta.text);
            }

            if delta.is_terminal() {
                break match delta.error {
                    Some(error) => Outcome::Failed(error),
                    None => Outcome::Completed,
                };
            }
        };

        handle.close();

        let upstream_error = match &outcome {
            Outcome::Completed => None,
            Outcome::Failed(error) => {
                warn!(message_id = %message_id, error = %error, "Generation failed upstream");
                Some(error.clone())
            }
            Outcome::TimedOut => {
                warn!(message_id = %message_id, "Generation timed out");
                Some(TIMEOUT_ERROR.to_string())
            }
            Outcome::Cancelled => {
                info!(message_id = %message_id, "Generation cancelled by consumer");
                None
            }
        };

        let finalized = pending.finalize(repository.as_ref(), quota.as_ref()).await;
        debug!(
            message_id = %message_id,
            total_tokens = finalized.total_tokens,
            "Generation finalized"
        );

        let error = match (upstream_error, finalized.error) {
            (Some(a), Some(b)) => Some(format!("{}; {}", a, b)),
            (a, b) => a.or(b),
        };
        let last = StreamChunk::last(message_id, finalized.total_tokens, error);

        match outcome {
            // Nobody may be listening any more
            Outcome::Cancelled => {
                let _ = chunks.try_send(last);
            }
            _ => {
                let _ = chunks.send(last).await;
            }
        }
    }
}
