//! Invoker contracts.
//!
//! An invoker turns one request into a lazy stream of partial results. The
//! registry stores them behind `Arc<dyn _>` and never manages the backend
//! client behind them.

use crate::Result;
use futures_core::Stream;
use llm::{ChatChunk, ChatRequest, CompletionChunk, CompletionRequest};
use std::pin::Pin;

/// A boxed stream of partial results
pub type ChunkStream<P> = Pin<Box<dyn Stream<Item = Result<P>> + Send>>;

/// Produces chat partials for a request
pub trait ChatInvoker: Send + Sync {
    /// Start generating for the request
    fn chat(&self, request: ChatRequest) -> ChunkStream<ChatChunk>;
}

/// Produces completion partials for a request
pub trait CompletionInvoker: Send + Sync {
    /// Start generating for the request
    fn complete(&self, request: CompletionRequest) -> ChunkStream<CompletionChunk>;
}

impl<F> ChatInvoker for F
where
    F: Fn(ChatRequest) -> ChunkStream<ChatChunk> + Send + Sync,
{
    fn chat(&self, request: ChatRequest) -> ChunkStream<ChatChunk> {
        self(request)
    }
}

impl<F> CompletionInvoker for F
where
    F: Fn(CompletionRequest) -> ChunkStream<CompletionChunk> + Send + Sync,
{
    fn complete(&self, request: CompletionRequest) -> ChunkStream<CompletionChunk> {
        self(request)
    }
}

/// Box a stream of partials into a [`ChunkStream`]
pub fn boxed<P, S>(stream: S) -> ChunkStream<P>
where
    S: Stream<Item = Result<P>> + Send + 'static,
{
    Box::pin(stream)
}
