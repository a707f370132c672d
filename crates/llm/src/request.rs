//! Chat and completion requests

use crate::ChatMessage;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A `POST /v1/chat/completions` request body
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct ChatRequest {
    /// The model identifier
    pub model: CompactString,

    /// The conversation so far
    pub messages: Vec<ChatMessage>,

    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling mass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// How many choices to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,

    /// Whether to stream the response as SSE frames
    #[serde(default)]
    pub stream: bool,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Stop>,

    /// Upper bound on generated tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Presence penalty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,

    /// Frequency penalty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,

    /// Per-token logit bias
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logit_bias: Option<BTreeMap<String, f32>>,

    /// Caller supplied user id, used for auditing and by some backends
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<CompactString>,
}

impl ChatRequest {
    /// Create a new request for a model
    pub fn new(model: impl Into<CompactString>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            ..Default::default()
        }
    }

    /// Set the stream flag
    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// The last message of the conversation, if any
    pub fn last_message(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// Render the conversation as `role: content` lines
    pub fn render(&self) -> String {
        self.messages
            .iter()
            .map(|m| format!("{}: {}\n", m.role.as_str(), m.text()))
            .collect()
    }
}

/// A `POST /v1/completions` request body
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct CompletionRequest {
    /// The model identifier
    pub model: CompactString,

    /// The prompt, a single string or a batch
    pub prompt: Prompt,

    /// Text appended after the completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,

    /// Upper bound on generated tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling mass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// How many choices to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,

    /// Whether to stream the response as SSE frames
    #[serde(default)]
    pub stream: bool,

    /// Number of log probabilities to return per token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<u32>,

    /// Echo the prompt in the completion
    #[serde(default)]
    pub echo: bool,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Stop>,

    /// Presence penalty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,

    /// Frequency penalty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,

    /// Server-side candidates to pick the best from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_of: Option<u32>,

    /// Per-token logit bias
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logit_bias: Option<BTreeMap<String, f32>>,

    /// Caller supplied user id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<CompactString>,
}

impl CompletionRequest {
    /// Create a new request for a model
    pub fn new(model: impl Into<CompactString>, prompt: impl Into<Prompt>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Set the stream flag
    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

/// A completion prompt
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Prompt {
    /// A single prompt
    Text(String),
    /// A batch of prompts
    Batch(Vec<String>),
}

impl Prompt {
    /// The prompt as one string, batches joined by newlines
    pub fn joined(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Batch(batch) => batch.join("\n"),
        }
    }
}

impl Default for Prompt {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl From<&str> for Prompt {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for Prompt {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<String>> for Prompt {
    fn from(batch: Vec<String>) -> Self {
        Self::Batch(batch)
    }
}

/// Stop sequences, a single string or a list
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Stop {
    /// A single stop sequence
    One(String),
    /// Several stop sequences
    Many(Vec<String>),
}
