//! Task transcripts.

use llm::{ChatChunk, ChatRequest};
use serde::{Deserialize, Serialize};

/// One transcript entry
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Entry {
    /// The request that started the task
    Request(ChatRequest),
    /// A partial produced by some round
    Chunk(ChatChunk),
}

/// Append-only record of one task run: the originating request followed
/// by every partial produced across all rounds. Rounds are delimited by
/// the finish reason of their last partial.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct Conversation {
    /// The entries, oldest first
    pub entries: Vec<Entry>,
}

impl Conversation {
    /// Start a transcript from its request
    pub fn new(request: ChatRequest) -> Self {
        Self {
            entries: vec![Entry::Request(request)],
        }
    }

    /// Append a partial
    pub fn push(&mut self, chunk: ChatChunk) {
        self.entries.push(Entry::Chunk(chunk));
    }

    /// The originating request
    pub fn request(&self) -> Option<&ChatRequest> {
        self.entries.iter().find_map(|e| match e {
            Entry::Request(request) => Some(request),
            Entry::Chunk(_) => None,
        })
    }

    /// All recorded partials
    pub fn chunks(&self) -> impl Iterator<Item = &ChatChunk> {
        self.entries.iter().filter_map(|e| match e {
            Entry::Chunk(chunk) => Some(chunk),
            Entry::Request(_) => None,
        })
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render as a flat task log: the request as `role: content` lines,
    /// then one `assistant:` line per round.
    pub fn render(&self) -> String {
        let mut log = self.request().map(ChatRequest::render).unwrap_or_default();
        let mut round = String::new();
        let mut open = false;
        for chunk in self.chunks() {
            round.push_str(&chunk.text());
            open = true;
            if chunk.finish_reason().is_some() {
                log.push_str(&format!("assistant: {round}\n"));
                round.clear();
                open = false;
            }
        }
        if open {
            log.push_str(&format!("assistant: {round}\n"));
        }
        log
    }
}
