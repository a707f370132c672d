//! OpenAI-compatible HTTP routes.

use crate::{ApiFailure, gateway::Gateway};
use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use futures_util::StreamExt;
use llm::{
    CHAT_COMPLETION_CHUNK, ChatRequest, Choice, CompletionRequest, Envelope, ModelInfo, ModelList,
    Partial, TEXT_COMPLETION,
};
use runtime::{CancelScope, ChunkStream, collect, emit};
use serde_json::{Value, json};
use std::{convert::Infallible, sync::Arc};
use tokio::sync::mpsc;

/// Frames buffered between the generation task and the response body
const FRAME_BUFFER: usize = 32;

/// Build the axum router with the `/v1` endpoints.
pub fn router(state: Gateway) -> Router {
    Router::new()
        .route("/v1/models", get(list_models))
        .route("/v1/models/reload", get(reload_models))
        .route("/v1/models/{id}", get(get_model))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/completions", post(completions))
        .route("/v1/apps/models/activate", post(activate_models))
        .with_state(state)
}

async fn list_models(State(state): State<Gateway>) -> Json<ModelList> {
    Json(ModelList::new(state.registry.list()))
}

async fn get_model(
    State(state): State<Gateway>,
    Path(id): Path<String>,
) -> Result<Json<ModelInfo>, ApiFailure> {
    Ok(Json(state.registry.resolve(&id)?.info.clone()))
}

async fn reload_models(State(state): State<Gateway>) -> Json<Value> {
    let count = state.reload().await;
    Json(json!({ "message": "Models reloaded", "count": count }))
}

async fn activate_models(State(state): State<Gateway>) -> Result<Response, ApiFailure> {
    let Some(activator) = &state.activator else {
        return Err(ApiFailure::new(
            StatusCode::NOT_FOUND,
            "invalid_request_error",
            "model activation needs an [apps] gateway_url",
        ));
    };
    let activated = activator.activate(state.registry.list()).await.map_err(|e| {
        ApiFailure::new(StatusCode::BAD_GATEWAY, "backend_error", format!("{e:#}"))
    })?;
    Ok(Json(activated).into_response())
}

async fn chat_completions(
    State(state): State<Gateway>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiFailure> {
    let Json(request) = payload?;
    let model = state.registry.resolve(&request.model)?;
    let invoker = model.chat()?;
    tracing::info!(model = %request.model, stream = request.stream, "chat completion");

    if request.stream {
        model.ensure_stream()?;
        let header = Envelope::new(CHAT_COMPLETION_CHUNK, request.model.clone());
        Ok(sse(header, invoker.chat(request)))
    } else {
        let header = Envelope::chat(request.model.clone());
        Ok(Json(collect(header, invoker.chat(request)).await?).into_response())
    }
}

async fn completions(
    State(state): State<Gateway>,
    payload: Result<Json<CompletionRequest>, JsonRejection>,
) -> Result<Response, ApiFailure> {
    let Json(request) = payload?;
    let model = state.registry.resolve(&request.model)?;
    let invoker = model.completion()?;
    tracing::info!(model = %request.model, stream = request.stream, "text completion");

    if request.stream {
        model.ensure_stream()?;
        let header = Envelope::new(TEXT_COMPLETION, request.model.clone());
        Ok(sse(header, invoker.complete(request)))
    } else {
        let header = Envelope::text(request.model.clone());
        Ok(Json(collect(header, invoker.complete(request)).await?).into_response())
    }
}

/// Stream a generation as `text/event-stream`.
///
/// Frames are produced on their own task and handed to the body through a
/// channel; the sending half doubles as the transport of the cancel scope,
/// so dropping the body cancels the generation.
fn sse<C: Choice>(envelope: Envelope<C>, source: ChunkStream<Partial<C>>) -> Response {
    let (tx, mut rx) = mpsc::channel::<Bytes>(FRAME_BUFFER);
    let scope = CancelScope::enter(Some(Arc::new(tx.clone())));

    tokio::spawn(async move {
        let mut frames = Box::pin(emit(envelope, source, scope));
        while let Some(frame) = frames.next().await {
            if tx.send(frame.encode()).await.is_err() {
                break;
            }
        }
    });

    let body = Body::from_stream(async_stream::stream! {
        while let Some(bytes) = rx.recv().await {
            yield Ok::<_, Infallible>(bytes);
        }
    });
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}
