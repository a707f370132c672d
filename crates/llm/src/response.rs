//! Choices and response envelopes

use crate::{ChatMessage, Role};
use compact_str::CompactString;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::time::{SystemTime, UNIX_EPOCH};

/// Object tag of a non-streaming chat response
pub const CHAT_COMPLETION: &str = "chat.completion";
/// Object tag of a streamed chat frame
pub const CHAT_COMPLETION_CHUNK: &str = "chat.completion.chunk";
/// Object tag of a text completion response and its frames
pub const TEXT_COMPLETION: &str = "text_completion";

/// A choice as carried by a response envelope.
///
/// Implemented by [`ChatChoice`] and [`CompletionChoice`] so the streaming
/// pipeline can be written once for both capabilities.
pub trait Choice: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The index of this choice in the list
    fn index(&self) -> u32;

    /// The reason the model stopped generating, if it did
    fn finish_reason(&self) -> Option<FinishReason>;

    /// Replace the finish reason
    fn set_finish_reason(&mut self, reason: Option<FinishReason>);

    /// The incremental text carried by this choice
    fn text(&self) -> Option<&str>;

    /// An empty choice that only signals `finish_reason = "stop"`
    fn stopped(index: u32) -> Self;
}

/// The reason the model stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The model finished naturally
    Stop,

    /// The model hit the max token limit
    Length,

    /// Content was filtered
    ContentFilter,

    /// The model is making tool calls
    ToolCalls,

    /// The model is making a legacy function call
    FunctionCall,

    /// Any reason this gateway does not know by name
    #[serde(other)]
    Other,
}

/// Token usage statistics. Counts are null when the backend does not report
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
pub struct Usage {
    /// Number of tokens in the prompt
    pub prompt_tokens: Option<u32>,

    /// Number of tokens in the completion
    pub completion_tokens: Option<u32>,

    /// Total number of tokens used
    pub total_tokens: Option<u32>,
}

/// Delta content in a streaming response
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct Delta {
    /// The role of the message author, set when the role switches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,

    /// The content delta
    #[serde(default)]
    pub content: Option<String>,
}

/// A chat choice.
///
/// Streamed choices carry `delta`; whole choices carry `message`. Choices
/// produced inside the gateway fill both so the same value works for the
/// streaming and the collected response.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct ChatChoice {
    /// The index of this choice in the list, required when decoding
    pub index: u32,

    /// The whole message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<ChatMessage>,

    /// The delta content for this chunk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<Delta>,

    /// The reason the model stopped generating
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

impl ChatChoice {
    /// An assistant choice carrying one piece of text
    pub fn assistant(index: u32, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            index,
            message: Some(ChatMessage::assistant(content.clone())),
            delta: Some(Delta {
                role: Some(Role::Assistant),
                content: Some(content),
            }),
            finish_reason: None,
        }
    }

    /// Set the finish reason
    pub fn with_finish_reason(mut self, reason: FinishReason) -> Self {
        self.finish_reason = Some(reason);
        self
    }

    /// The content of this choice, preferring the delta
    pub fn content(&self) -> Option<&str> {
        self.delta
            .as_ref()
            .and_then(|d| d.content.as_deref())
            .or_else(|| self.message.as_ref().and_then(|m| m.content.as_deref()))
    }
}

impl Choice for ChatChoice {
    fn index(&self) -> u32 {
        self.index
    }

    fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    fn set_finish_reason(&mut self, reason: Option<FinishReason>) {
        self.finish_reason = reason;
    }

    fn text(&self) -> Option<&str> {
        self.content()
    }

    fn stopped(index: u32) -> Self {
        ChatChoice::assistant(index, "").with_finish_reason(FinishReason::Stop)
    }
}

/// A text completion choice
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct CompletionChoice {
    /// The index of this choice in the list
    pub index: u32,

    /// The generated text
    #[serde(default)]
    pub text: String,

    /// Token log probabilities, passed through untouched
    #[serde(default)]
    pub logprobs: Option<serde_json::Value>,

    /// The reason the model stopped generating
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

impl CompletionChoice {
    /// A choice carrying one piece of text
    pub fn new(index: u32, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
            ..Default::default()
        }
    }
}

impl Choice for CompletionChoice {
    fn index(&self) -> u32 {
        self.index
    }

    fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    fn set_finish_reason(&mut self, reason: Option<FinishReason>) {
        self.finish_reason = reason;
    }

    fn text(&self) -> Option<&str> {
        Some(&self.text)
    }

    fn stopped(index: u32) -> Self {
        Self {
            index,
            finish_reason: Some(FinishReason::Stop),
            ..Default::default()
        }
    }
}

/// The wire-level response object wrapping one or more choices.
///
/// Used for non-streaming responses and reused for every streamed frame.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Envelope<C> {
    /// A unique identifier for the response
    #[serde(default)]
    pub id: String,

    /// The object tag
    #[serde(default)]
    pub object: CompactString,

    /// Unix timestamp (in seconds) of when the response was created
    #[serde(default)]
    pub created: u64,

    /// The model used for the response
    #[serde(default)]
    pub model: CompactString,

    /// Token usage statistics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// The list of choices
    pub choices: Vec<C>,
}

impl<C> Envelope<C> {
    /// Create an empty envelope with a fresh id and the current time
    pub fn new(object: &str, model: impl Into<CompactString>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            object: object.into(),
            created: unix_now(),
            model: model.into(),
            usage: None,
            choices: Vec::new(),
        }
    }

    /// Create an empty `chat.completion` envelope
    pub fn chat(model: impl Into<CompactString>) -> Self {
        Self::new(CHAT_COMPLETION, model)
    }

    /// Create an empty `text_completion` envelope
    pub fn text(model: impl Into<CompactString>) -> Self {
        Self::new(TEXT_COMPLETION, model)
    }

    /// The same header carrying the given choices
    pub fn with_choices(&self, choices: Vec<C>, usage: Option<Usage>) -> Self {
        Self {
            id: self.id.clone(),
            object: self.object.clone(),
            created: self.created,
            model: self.model.clone(),
            usage,
            choices,
        }
    }
}

/// OpenAI-style error body
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ApiError {
    /// The error detail
    pub error: ErrorDetail,
}

/// The detail of an [`ApiError`]
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ErrorDetail {
    /// Human readable message
    pub message: String,

    /// Machine readable error kind
    #[serde(rename = "type")]
    pub kind: CompactString,

    /// Optional error code
    #[serde(default)]
    pub code: Option<CompactString>,
}

impl ApiError {
    /// Create a new error body
    pub fn new(kind: &str, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                message: message.into(),
                kind: kind.into(),
                code: None,
            },
        }
    }
}

/// Seconds since the unix epoch
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
