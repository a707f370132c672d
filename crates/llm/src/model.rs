//! Model descriptors

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// What a model can do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
pub struct Capabilities {
    /// Serves `/v1/chat/completions`
    #[serde(default)]
    pub chat: bool,

    /// Serves `/v1/completions`
    #[serde(default)]
    pub completion: bool,

    /// Can stream its output
    #[serde(default)]
    pub stream: bool,
}

impl Capabilities {
    /// Chat, completion and streaming
    pub const ALL: Self = Self {
        chat: true,
        completion: true,
        stream: true,
    };

    /// Streaming chat only
    pub const CHAT: Self = Self {
        chat: true,
        completion: false,
        stream: true,
    };
}

/// A model descriptor as listed by `/v1/models`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ModelInfo {
    /// The unique model identifier
    pub id: CompactString,

    /// The object tag, always `"model"`
    #[serde(default = "model_object")]
    pub object: CompactString,

    /// The owning account or organisation
    #[serde(default)]
    pub owned_by: Option<CompactString>,

    /// The model capabilities
    #[serde(default)]
    pub capabilities: Capabilities,
}

impl ModelInfo {
    /// Create a new descriptor
    pub fn new(
        id: impl Into<CompactString>,
        owned_by: impl Into<CompactString>,
        capabilities: Capabilities,
    ) -> Self {
        Self {
            id: id.into(),
            object: model_object(),
            owned_by: Some(owned_by.into()),
            capabilities,
        }
    }
}

/// The `/v1/models` response body
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ModelList {
    /// The object tag, always `"list"`
    pub object: CompactString,

    /// The listed models
    pub data: Vec<ModelInfo>,
}

impl ModelList {
    /// Wrap descriptors in a list body
    pub fn new(data: Vec<ModelInfo>) -> Self {
        Self {
            object: CompactString::const_new("list"),
            data,
        }
    }
}

fn model_object() -> CompactString {
    CompactString::const_new("model")
}
