//! OpenAI-compatible wire types.
//!
//! This crate provides the shared types spoken on the gateway's HTTP surface
//! and passed between invokers and the streaming pipeline: `ChatMessage`,
//! `ChatRequest`/`CompletionRequest`, the choice types, the response
//! `Envelope`, the `Partial` tagged union produced by invokers, and the SSE
//! `Frame` codec.

pub use frame::{DONE, Frame, FrameDecoder};
pub use message::{ChatMessage, Role};
pub use model::{Capabilities, ModelInfo, ModelList};
pub use request::{ChatRequest, CompletionRequest, Prompt, Stop};
pub use response::{
    ApiError, CHAT_COMPLETION, CHAT_COMPLETION_CHUNK, ChatChoice, Choice, CompletionChoice, Delta,
    Envelope, ErrorDetail, FinishReason, TEXT_COMPLETION, Usage, unix_now,
};
pub use stream::{ChatChunk, CompletionChunk, Partial};

mod frame;
mod message;
mod model;
mod request;
mod response;
mod stream;
