//! Streamed model replies: the provider adapter and the pipeline that drives it.

pub mod adapter;
pub mod openai;
pub mod pipeline;
pub mod tokens;

pub use adapter::{
    ContextMessage, ContextRole, GenerationContext, GenerationDelta, GenerationError,
    GenerationHandle, GenerationSource,
};
pub use openai::OpenAIGenerationSource;
pub use pipeline::{
    Admission, ChunkStream, FinalizeTarget, GenerationRequest, StreamChunk, StreamingPipeline,
    DEFAULT_GENERATION_TIMEOUT, TIMEOUT_ERROR,
};
pub use tokens::estimate_tokens;
