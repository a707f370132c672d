//! Judge backed by an OpenAI-compatible chat endpoint.

use crate::utils::join_url;
use anyhow::{Context, Result};
use compact_str::CompactString;
use llm::{ChatChoice, ChatMessage, ChatRequest, Envelope};
use runtime::task::{JUDGE_INSTRUCTION, Judge, Verdict};
use std::time::Duration;

/// Asks a chat model whether a task log is finished.
///
/// Runs on the blocking pool, so each call builds its own blocking client.
#[derive(Debug, Clone)]
pub struct HttpJudge {
    endpoint: String,
    api_key: String,
    model: CompactString,
}

impl HttpJudge {
    /// A judge at `base_url` using `model`
    pub fn new(base_url: &str, api_key: &str, model: impl Into<CompactString>) -> Self {
        Self {
            endpoint: join_url(base_url, "chat/completions"),
            api_key: api_key.to_owned(),
            model: model.into(),
        }
    }
}

impl Judge for HttpJudge {
    fn judge(&self, log: &str) -> Result<Verdict> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        let request = ChatRequest::new(
            self.model.clone(),
            vec![ChatMessage::system(JUDGE_INSTRUCTION), ChatMessage::user(log)],
        );

        let mut call = client.post(&self.endpoint).json(&request);
        if !self.api_key.is_empty() {
            call = call.bearer_auth(&self.api_key);
        }
        let response: Envelope<ChatChoice> = call
            .send()?
            .error_for_status()
            .context("judge request failed")?
            .json()?;

        let answer = response
            .choices
            .first()
            .and_then(ChatChoice::content)
            .context("judge returned no answer")?;
        Verdict::parse(answer)
    }
}
