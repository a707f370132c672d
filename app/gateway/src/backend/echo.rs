//! Echo backend: a local stand-in model for smoke runs and tests.

use compact_str::CompactString;
use futures_core::Stream;
use llm::{
    Capabilities, ChatChoice, ChatChunk, ChatRequest, CompletionChoice, CompletionChunk,
    CompletionRequest, ModelInfo,
};
use runtime::{ChatInvoker, ChunkStream, CompletionInvoker, Model, boxed};
use std::time::Duration;

/// Streams a transformed copy of the prompt, one word per chunk.
#[derive(Debug, Clone, Copy)]
pub struct Echo {
    delay: Duration,
}

impl Echo {
    /// An echo backend pausing `delay` between chunks
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// A chat and completion model backed by this echo
    pub fn model(self, id: impl Into<CompactString>) -> Model {
        Model::new(ModelInfo::new(id, "self", Capabilities::ALL))
            .with_chat(self)
            .with_completion(self)
    }

    fn paced<T: Send + 'static>(
        &self,
        items: Vec<T>,
    ) -> impl Stream<Item = runtime::Result<T>> + Send + use<T> {
        let delay = self.delay;
        async_stream::stream! {
            for (i, item) in items.into_iter().enumerate() {
                if i > 0 && !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(item);
            }
        }
    }
}

/// The echo of a prompt: the prompt reversed inside a think block, then
/// the prompt without its last character.
pub fn echo_text(prompt: &str) -> String {
    let reversed: String = prompt.chars().rev().collect();
    let mut head = prompt.chars();
    head.next_back();
    format!("<think> {reversed}</think> {}", head.as_str())
}

fn words(prompt: &str) -> Vec<String> {
    echo_text(prompt)
        .split_inclusive(' ')
        .map(str::to_owned)
        .collect()
}

impl ChatInvoker for Echo {
    fn chat(&self, request: ChatRequest) -> ChunkStream<ChatChunk> {
        let chunks: Vec<ChatChunk> = words(&request.render())
            .into_iter()
            .map(|word| ChatChoice::assistant(0, word).into())
            .collect();
        boxed(self.paced(chunks))
    }
}

impl CompletionInvoker for Echo {
    fn complete(&self, request: CompletionRequest) -> ChunkStream<CompletionChunk> {
        let chunks: Vec<CompletionChunk> = words(&request.prompt.joined())
            .into_iter()
            .map(|word| CompletionChoice::new(0, word).into())
            .collect();
        boxed(self.paced(chunks))
    }
}
