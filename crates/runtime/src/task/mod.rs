//! Multi-round task continuation.
//!
//! A task model keeps generating across rounds until the transcript ends
//! with the terminal marker, a judge says the task is finished, or the
//! round budget runs out. The pipeline is two stages over the same
//! [`ChunkStream`]:
//!
//! - [`continuation`] drives the rounds and records every partial.
//! - [`persist_on_exit`] writes the transcript when the stream ends or is
//!   dropped.

pub use judge::{JUDGE_INSTRUCTION, Judge, Verdict, ask};
pub use store::TranscriptStore;
pub use transcript::{Conversation, Entry};

use crate::{ChatInvoker, ChunkStream, boxed};
use futures_util::StreamExt;
use llm::{ChatChoice, ChatChunk, ChatMessage, ChatRequest, Choice};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, sync::Arc};

mod judge;
mod store;
mod transcript;

/// Default number of rounds
pub const DEFAULT_MAX_ROUNDS: usize = 3;

/// Default marker a finished task log ends with
pub const DEFAULT_TERMINAL_MARKER: &str = "[TASK_FINISHED]";

/// Default user message appended to continue a task
pub const DEFAULT_CONTINUE_PROMPT: &str = "Continue the task from where you stopped.";

/// A transcript shared by the pipeline stages of one run
pub type SharedConversation = Arc<Mutex<Conversation>>;

/// What to do when the judge cannot be invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JudgeFailurePolicy {
    /// Treat the task as finished
    #[default]
    Finished,
    /// Run the next round anyway
    Continue,
    /// End the stream with the judge error
    Abort,
}

/// Task loop configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Upper bound on generation rounds
    pub max_rounds: usize,

    /// A task log ending with this marker is finished without asking the
    /// judge
    pub terminal_marker: String,

    /// The user message that asks the model to keep going
    pub continue_prompt: String,

    /// Behaviour when the judge fails
    pub judge_failure: JudgeFailurePolicy,

    /// Where transcripts are written. Nothing is persisted when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            terminal_marker: DEFAULT_TERMINAL_MARKER.into(),
            continue_prompt: DEFAULT_CONTINUE_PROMPT.into(),
            judge_failure: JudgeFailurePolicy::default(),
            log_dir: None,
        }
    }
}

/// A chat invoker that runs the continuation loop around another one.
pub struct TaskInvoker {
    inner: Arc<dyn ChatInvoker>,
    judge: Arc<dyn Judge>,
    config: Arc<TaskConfig>,
    store: Option<TranscriptStore>,
}

impl TaskInvoker {
    /// Wrap an invoker with a judge
    pub fn new(inner: Arc<dyn ChatInvoker>, judge: Arc<dyn Judge>, config: TaskConfig) -> Self {
        let store = config.log_dir.clone().map(TranscriptStore::new);
        Self {
            inner,
            judge,
            config: Arc::new(config),
            store,
        }
    }
}

impl ChatInvoker for TaskInvoker {
    fn chat(&self, request: ChatRequest) -> ChunkStream<ChatChunk> {
        let transcript = Arc::new(Mutex::new(Conversation::new(request.clone())));
        let rounds = continuation(
            self.inner.clone(),
            self.judge.clone(),
            self.config.clone(),
            request,
            transcript.clone(),
        );
        match &self.store {
            Some(store) => persist_on_exit(rounds, store.clone(), transcript),
            None => rounds,
        }
    }
}

/// The request for the next round: the original messages, one assistant
/// message per finished round, then the continuation prompt.
pub fn replay(request: &ChatRequest, replies: &[String], continue_prompt: &str) -> ChatRequest {
    let mut next = request.clone();
    if replies.is_empty() {
        return next;
    }

    next.messages
        .extend(replies.iter().map(|reply| ChatMessage::assistant(reply.as_str())));
    next.messages.push(ChatMessage::user(continue_prompt));
    next
}

/// Run up to `max_rounds` rounds of `inner`, recording every partial in
/// `transcript`.
///
/// Finish reasons of individual rounds are recorded but stripped from the
/// forwarded partials; the stream ends with one empty `stop` choice once
/// the loop is done.
pub fn continuation(
    inner: Arc<dyn ChatInvoker>,
    judge: Arc<dyn Judge>,
    config: Arc<TaskConfig>,
    request: ChatRequest,
    transcript: SharedConversation,
) -> ChunkStream<ChatChunk> {
    boxed(async_stream::try_stream! {
        let max_rounds = config.max_rounds.max(1);
        let mut replies: Vec<String> = Vec::new();

        for round in 1..=max_rounds {
            tracing::debug!("task round {round}/{max_rounds}");
            let mut source = inner.chat(replay(&request, &replies, &config.continue_prompt));
            let mut text = String::new();
            let mut finished = false;

            while let Some(chunk) = source.next().await {
                let mut chunk = chunk?;
                transcript.lock().push(chunk.clone());
                finished |= chunk.finish_reason().is_some();
                text.push_str(&chunk.text());
                for choice in chunk.choices_mut() {
                    choice.set_finish_reason(None);
                }
                yield chunk;
            }

            if !finished {
                transcript.lock().push(ChatChoice::stopped(0).into());
            }
            replies.push(text);

            let log = transcript.lock().render();
            if log.trim_end().ends_with(config.terminal_marker.as_str()) {
                tracing::info!("task finished by marker after {round} rounds");
                break;
            }
            if round == max_rounds {
                tracing::info!("task stopped after exhausting {max_rounds} rounds");
                break;
            }

            match ask(judge.clone(), log).await {
                Ok(verdict) if verdict.is_finished => {
                    tracing::info!("task judged finished after {round} rounds: {}", verdict.reason);
                    break;
                }
                Ok(verdict) => tracing::debug!("task not finished: {}", verdict.reason),
                Err(e) => match config.judge_failure {
                    JudgeFailurePolicy::Finished => {
                        tracing::warn!("{e}, treating the task as finished");
                        break;
                    }
                    JudgeFailurePolicy::Continue => {
                        tracing::warn!("{e}, continuing the task");
                    }
                    JudgeFailurePolicy::Abort => Err(e)?,
                },
            }
        }

        yield ChatChoice::stopped(0).into();
    })
}

/// Persist `transcript` once `source` is exhausted or dropped.
///
/// Failures are logged and never reach the consumer.
pub fn persist_on_exit(
    source: ChunkStream<ChatChunk>,
    store: TranscriptStore,
    transcript: SharedConversation,
) -> ChunkStream<ChatChunk> {
    boxed(async_stream::stream! {
        let _persist = PersistGuard { store, transcript };
        let mut source = source;
        while let Some(item) = source.next().await {
            yield item;
        }
    })
}

struct PersistGuard {
    store: TranscriptStore,
    transcript: SharedConversation,
}

impl Drop for PersistGuard {
    fn drop(&mut self) {
        let conversation = std::mem::take(&mut *self.transcript.lock());
        let store = self.store.clone();
        let save = move || match store.save(&conversation) {
            Ok(path) => tracing::info!("transcript saved to {}", path.display()),
            Err(e) => tracing::warn!("{e}"),
        };

        // keep file io off the async workers
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => drop(handle.spawn_blocking(save)),
            Err(_) => save(),
        }
    }
}
