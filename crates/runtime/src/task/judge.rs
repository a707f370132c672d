//! Task completion judge.

use crate::{Error, Result, blocking_stream};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The fixed instruction sent to a judge model along with the task log.
pub const JUDGE_INSTRUCTION: &str = "You review the log of an autonomous task. \
Decide whether every goal stated in the log has been completed. \
Answer with JSON only, in the form {\"is_finished\": true|false, \"reason\": \"...\"}.";

/// The judge's answer
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
pub struct Verdict {
    /// Whether the task is complete
    pub is_finished: bool,

    /// Why the judge decided so
    #[serde(default)]
    pub reason: String,
}

impl Verdict {
    /// Parse a verdict from model output, tolerating markdown code fences
    /// and text around the JSON object.
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let text = text.trim();
        let json = match (text.find('{'), text.rfind('}')) {
            (Some(start), Some(end)) if start < end => &text[start..=end],
            _ => anyhow::bail!("no JSON object in judge answer: {text}"),
        };
        Ok(serde_json::from_str(json)?)
    }
}

/// Decides whether a task log describes a finished task.
///
/// Implementations are blocking; the loop always calls them through the
/// thread bridge.
pub trait Judge: Send + Sync + 'static {
    /// Judge the rendered task log
    fn judge(&self, log: &str) -> anyhow::Result<Verdict>;
}

impl<F> Judge for F
where
    F: Fn(&str) -> anyhow::Result<Verdict> + Send + Sync + 'static,
{
    fn judge(&self, log: &str) -> anyhow::Result<Verdict> {
        self(log)
    }
}

/// Ask the judge off the async scheduler
pub async fn ask(judge: Arc<dyn Judge>, log: String) -> Result<Verdict> {
    let answers = blocking_stream(move || std::iter::once(judge.judge(&log)));
    futures_util::pin_mut!(answers);
    match answers.next().await {
        Some(Ok(verdict)) => Ok(verdict),
        Some(Err(e)) => Err(Error::Judge(e.to_string())),
        None => Err(Error::Judge("judge produced no answer".into())),
    }
}
