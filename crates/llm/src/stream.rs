//! Partial results produced by invokers

use crate::{ChatChoice, Choice, CompletionChoice, Envelope, FinishReason, Usage};
use serde::{Deserialize, Serialize};

/// A streamed chat partial
pub type ChatChunk = Partial<ChatChoice>;

/// A streamed completion partial
pub type CompletionChunk = Partial<CompletionChoice>;

/// One partial result as it enters the streaming pipeline.
///
/// Backends either yield a bare choice or a full upstream envelope. The
/// shape is decided once, here, and downstream code only deals with the
/// choices and the optional usage.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Partial<C> {
    /// A full multi-choice envelope, e.g. relayed from an upstream API
    Envelope(Envelope<C>),
    /// A single choice
    Choice(C),
}

impl<C: Choice> Partial<C> {
    /// The choices carried by this partial
    pub fn choices(&self) -> &[C] {
        match self {
            Self::Envelope(envelope) => &envelope.choices,
            Self::Choice(choice) => std::slice::from_ref(choice),
        }
    }

    /// Mutable access to the choices carried by this partial
    pub fn choices_mut(&mut self) -> &mut [C] {
        match self {
            Self::Envelope(envelope) => &mut envelope.choices,
            Self::Choice(choice) => std::slice::from_mut(choice),
        }
    }

    /// Split into choices and the usage an envelope may report
    pub fn into_parts(self) -> (Vec<C>, Option<Usage>) {
        match self {
            Self::Envelope(envelope) => (envelope.choices, envelope.usage),
            Self::Choice(choice) => (vec![choice], None),
        }
    }

    /// The first finish reason carried by any choice
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.choices().iter().find_map(Choice::finish_reason)
    }

    /// The concatenated text of all choices
    pub fn text(&self) -> String {
        self.choices().iter().filter_map(Choice::text).collect()
    }
}

impl<C> From<C> for Partial<C> {
    fn from(choice: C) -> Self {
        Self::Choice(choice)
    }
}
