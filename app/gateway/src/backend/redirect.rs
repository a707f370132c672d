//! Redirect backend: relays chat requests to an OpenAI-compatible upstream.

use crate::{config::RedirectConfig, utils::join_url};
use anyhow::Result;
use async_stream::try_stream;
use compact_str::CompactString;
use futures_core::Stream;
use futures_util::StreamExt;
use llm::{ApiError, Capabilities, ChatChunk, ChatRequest, Frame, FrameDecoder, ModelInfo};
use reqwest::{
    Client,
    header::{self, HeaderMap, HeaderValue},
};
use runtime::{ChatInvoker, ChunkStream, Error, Model, boxed};

/// Streams chat completions from an upstream `/chat/completions` endpoint.
///
/// Upstream frames are yielded as whole envelopes; the emitter repackages
/// them under the gateway's own response id.
#[derive(Clone)]
pub struct Redirect {
    client: Client,
    headers: HeaderMap,
    endpoint: String,
    upstream_model: CompactString,
}

impl Redirect {
    /// Build a redirect from its configuration
    pub fn new(client: Client, config: &RedirectConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/event-stream"));
        if !config.api_key.is_empty() {
            headers.insert(
                header::AUTHORIZATION,
                format!("Bearer {}", config.api_key).parse()?,
            );
        }

        Ok(Self {
            client,
            headers,
            endpoint: join_url(&config.base_url, "chat/completions"),
            upstream_model: config.upstream_model.as_str().into(),
        })
    }

    /// A streaming chat model backed by this redirect
    pub fn model(self, id: impl Into<CompactString>) -> Model {
        Model::new(ModelInfo::new(id, "self", Capabilities::CHAT)).with_chat(self)
    }

    /// The upstream endpoint
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Stream the upstream response for a request
    pub fn stream(&self, mut request: ChatRequest) -> impl Stream<Item = Result<ChatChunk>> + Send + use<> {
        tracing::info!("redirecting chat for {} to {}", request.model, self.endpoint);
        request.model = self.upstream_model.clone();
        request.stream = true;
        let request = self
            .client
            .post(&self.endpoint)
            .headers(self.headers.clone())
            .json(&request);

        try_stream! {
            let response = request.send().await?.error_for_status()?;
            let mut body = response.bytes_stream();
            let mut decoder = FrameDecoder::new();

            'body: while let Some(next) = body.next().await {
                for frame in decoder.push(&next?) {
                    match parse(&frame)? {
                        Some(chunk) => yield chunk,
                        None if frame.is_done() => break 'body,
                        None => {}
                    }
                }
            }
            if let Some(frame) = decoder.finish() {
                if let Some(chunk) = parse(&frame)? {
                    yield chunk;
                }
            }
        }
    }
}

fn parse(frame: &Frame) -> Result<Option<ChatChunk>> {
    let Some(data) = frame.data() else {
        return Ok(None);
    };
    tracing::trace!("upstream frame: {data}");
    if let Ok(err) = serde_json::from_str::<ApiError>(data) {
        anyhow::bail!("upstream error: {}", err.error.message);
    }
    match serde_json::from_str::<ChatChunk>(data) {
        Ok(chunk) => Ok(Some(chunk)),
        Err(e) => {
            tracing::warn!("failed to parse upstream frame: {e}, data: {data}");
            Ok(None)
        }
    }
}

impl ChatInvoker for Redirect {
    fn chat(&self, request: ChatRequest) -> ChunkStream<ChatChunk> {
        boxed(self.stream(request).map(|item| item.map_err(Error::backend)))
    }
}
