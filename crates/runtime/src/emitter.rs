//! Streaming event emitter.
//!
//! Turns an invoker's partials into SSE frames. Every partial, whether a
//! bare choice or an upstream envelope, is repackaged into the request's
//! own envelope header before it is serialized. The liveness of the client
//! is checked before every frame.

use crate::{CancelScope, ChunkStream, Error, Result};
use futures_core::Stream;
use futures_util::StreamExt;
use llm::{ApiError, Choice, Envelope, Frame, Partial, Usage};

/// Stream the partials of one request as SSE frames.
///
/// The frame sequence is the content frames, then one synthesized
/// `finish_reason = "stop"` frame if the source never finished, then a
/// single `[DONE]`. A source error ends the stream with one error frame and
/// no `[DONE]`. Once the scope reports cancellation nothing more is
/// produced, including while the source is waiting for its next partial.
pub fn emit<C: Choice>(
    header: Envelope<C>,
    mut source: ChunkStream<Partial<C>>,
    scope: CancelScope,
) -> impl Stream<Item = Frame> + Send {
    async_stream::stream! {
        let mut finished = false;
        let mut frames = 0usize;
        let mut outcome: Result<()> = Ok(());

        loop {
            let next = tokio::select! {
                next = source.next() => next,
                () = scope.closed() => {
                    outcome = Err(Error::Cancelled);
                    break;
                }
            };
            let Some(next) = next else {
                break;
            };
            let partial = match next {
                Ok(partial) => partial,
                Err(e) => {
                    tracing::warn!(scope = scope.id(), "stream aborted after {frames} frames: {e}");
                    outcome = Err(e);
                    break;
                }
            };

            let (choices, usage) = partial.into_parts();
            finished |= choices.iter().any(|c| c.finish_reason().is_some());
            let envelope = header.with_choices(choices, usage);

            if scope.wait().await {
                outcome = Err(Error::Cancelled);
                break;
            }
            match Frame::json(&envelope) {
                Ok(frame) => yield frame,
                Err(e) => {
                    outcome = Err(Error::backend(e));
                    break;
                }
            }
            frames += 1;
        }

        if outcome.is_ok() && !finished {
            if scope.wait().await {
                outcome = Err(Error::Cancelled);
            } else {
                match Frame::json(&header.with_choices(vec![C::stopped(0)], None)) {
                    Ok(frame) => yield frame,
                    Err(e) => outcome = Err(Error::backend(e)),
                }
            }
        }
        if scope.wait().await {
            outcome = Err(Error::Cancelled);
        }

        drop(source);
        match scope.exit(outcome) {
            Ok(Some(())) => {
                tracing::debug!("stream finished after {frames} frames");
                yield Frame::Done;
            }
            Ok(None) => tracing::debug!("stream stopped by the client after {frames} frames"),
            Err(e) => yield error_frame(&e),
        }
    }
}

/// Drain the partials of one request into a single response envelope.
///
/// Every produced choice lands in `choices`. `usage` is always present,
/// with null counts unless the backend reported some.
pub async fn collect<C: Choice>(
    header: Envelope<C>,
    mut source: ChunkStream<Partial<C>>,
) -> Result<Envelope<C>> {
    let mut choices = Vec::new();
    let mut usage = Usage::default();
    while let Some(partial) = source.next().await {
        let (produced, reported) = partial?.into_parts();
        choices.extend(produced);
        if let Some(reported) = reported {
            usage = reported;
        }
    }
    Ok(header.with_choices(choices, Some(usage)))
}

/// An OpenAI-style error frame
pub fn error_frame(err: &Error) -> Frame {
    let body = ApiError::new(err.kind(), err.to_string());
    Frame::json(&body).unwrap_or_else(|_| {
        Frame::Data(r#"{"error":{"message":"internal error","type":"internal_error"}}"#.into())
    })
}
