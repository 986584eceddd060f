//! Server dependencies (using traits for testability)
//!
//! The central container every route reaches services through. Storage,
//! quota, and the upstream model sit behind trait objects so tests can swap
//! in the in-memory doubles from `test_dependencies`.

use std::sync::Arc;
use std::time::Duration;

use crate::domains::auth::JwtService;
use crate::domains::chat::ChatService;
use crate::domains::messenger::MessengerService;
use crate::generation::{GenerationSource, StreamingPipeline, DEFAULT_GENERATION_TIMEOUT};
use crate::kernel::{ChatRepository, MessengerRepository, QuotaService};
use crate::realtime::{BroadcastDispatcher, Hub};

/// Server dependencies accessible to routes
#[derive(Clone)]
pub struct ServerDeps {
    /// Process-wide connection registry. Built once, never looked up globally.
    pub hub: Hub,
    pub dispatcher: BroadcastDispatcher,
    pub chat_repository: Arc<dyn ChatRepository>,
    pub messenger_repository: Arc<dyn MessengerRepository>,
    pub quota: Arc<dyn QuotaService>,
    pub generation: Arc<dyn GenerationSource>,
    pub jwt_service: Arc<JwtService>,
    /// Model used when a chat doesn't name one
    pub default_model: String,
    pub generation_timeout: Duration,
}

impl ServerDeps {
    /// Create new ServerDeps with the given dependencies
    pub fn new(
        hub: Hub,
        chat_repository: Arc<dyn ChatRepository>,
        messenger_repository: Arc<dyn MessengerRepository>,
        quota: Arc<dyn QuotaService>,
        generation: Arc<dyn GenerationSource>,
        jwt_service: Arc<JwtService>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            dispatcher: BroadcastDispatcher::new(hub.clone()),
            hub,
            chat_repository,
            messenger_repository,
            quota,
            generation,
            jwt_service,
            default_model: default_model.into(),
            generation_timeout: DEFAULT_GENERATION_TIMEOUT,
        }
    }

    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    pub fn messenger(&self) -> MessengerService {
        MessengerService::new(self.messenger_repository.clone(), self.dispatcher.clone())
    }

    pub fn pipeline(&self) -> StreamingPipeline {
        StreamingPipeline::new(
            self.generation.clone(),
            self.chat_repository.clone(),
            self.quota.clone(),
        )
        .with_timeout(self.generation_timeout)
    }

    pub fn chat(&self) -> ChatService {
        ChatService::new(
            self.chat_repository.clone(),
            self.quota.clone(),
            self.pipeline(),
            self.default_model.clone(),
        )
    }
}
