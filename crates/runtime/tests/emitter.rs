//! Tests for the streaming event emitter.

use ferry_runtime::{CancelScope, ChunkStream, Error, Transport, boxed, collect, emit};
use futures_util::{StreamExt, stream};
use llm::{
    CHAT_COMPLETION, CHAT_COMPLETION_CHUNK, ChatChoice, ChatChunk, CompletionChoice,
    CompletionChunk, Envelope, FinishReason, Frame, Partial, TEXT_COMPLETION,
};
use serde_json::Value;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

fn chat_source(items: Vec<Result<ChatChunk, Error>>) -> ChunkStream<ChatChunk> {
    boxed(stream::iter(items))
}

fn words(words: &[&str]) -> Vec<Result<ChatChunk, Error>> {
    words
        .iter()
        .map(|w| Ok(ChatChoice::assistant(0, *w).into()))
        .collect()
}

fn json(frame: &Frame) -> Value {
    serde_json::from_str(frame.data().expect("data frame")).unwrap()
}

async fn run(source: ChunkStream<ChatChunk>) -> (Envelope<ChatChoice>, Vec<Frame>) {
    let header = Envelope::new(CHAT_COMPLETION_CHUNK, "echo-model");
    let frames = emit(header.clone(), source, CancelScope::detached())
        .collect()
        .await;
    (header, frames)
}

#[tokio::test]
async fn synthesizes_stop_when_source_never_finishes() {
    let (header, frames) = run(chat_source(words(&["a", "b", "c"]))).await;

    assert_eq!(frames.len(), 5);
    assert_eq!(frames.iter().filter(|f| f.is_done()).count(), 1);
    assert!(frames[4].is_done());

    for frame in &frames[..4] {
        let body = json(frame);
        assert_eq!(body["id"], header.id.as_str());
        assert_eq!(body["object"], CHAT_COMPLETION_CHUNK);
        assert_eq!(body["model"], "echo-model");
    }
    let stop = json(&frames[3]);
    assert_eq!(stop["choices"][0]["finish_reason"], "stop");
    assert_eq!(stop["choices"][0]["delta"]["content"], "");
    assert!(json(&frames[2])["choices"][0]["finish_reason"].is_null());
}

#[tokio::test]
async fn explicit_finish_is_not_duplicated() {
    let items = vec![
        Ok(ChatChoice::assistant(0, "a").into()),
        Ok(ChatChoice::assistant(0, "b")
            .with_finish_reason(FinishReason::Length)
            .into()),
    ];
    let (_, frames) = run(chat_source(items)).await;

    assert_eq!(frames.len(), 3);
    assert_eq!(json(&frames[1])["choices"][0]["finish_reason"], "length");
    assert!(frames[2].is_done());
}

#[tokio::test]
async fn empty_source_still_terminates() {
    let (_, frames) = run(chat_source(Vec::new())).await;
    assert_eq!(frames.len(), 2);
    assert_eq!(json(&frames[0])["choices"][0]["finish_reason"], "stop");
    assert!(frames[1].is_done());
}

#[tokio::test]
async fn upstream_envelopes_are_repackaged() {
    let mut upstream = Envelope::new(CHAT_COMPLETION_CHUNK, "upstream-model");
    upstream.id = "chatcmpl-upstream".into();
    upstream.choices = vec![
        ChatChoice::assistant(0, "left"),
        ChatChoice::assistant(1, "right").with_finish_reason(FinishReason::Stop),
    ];
    let (header, frames) = run(chat_source(vec![Ok(Partial::Envelope(upstream))])).await;

    assert_eq!(frames.len(), 2);
    let body = json(&frames[0]);
    assert_eq!(body["id"], header.id.as_str());
    assert_eq!(body["model"], "echo-model");
    assert_eq!(body["choices"].as_array().unwrap().len(), 2);
    assert_eq!(body["choices"][1]["delta"]["content"], "right");
}

#[tokio::test]
async fn backend_error_ends_with_error_frame() {
    let items = vec![
        Ok(ChatChoice::assistant(0, "partial").into()),
        Err(Error::backend(anyhow::anyhow!("upstream reset"))),
        Ok(ChatChoice::assistant(0, "never").into()),
    ];
    let (_, frames) = run(chat_source(items)).await;

    assert_eq!(frames.len(), 2);
    assert_eq!(json(&frames[0])["choices"][0]["delta"]["content"], "partial");
    let error = json(&frames[1]);
    assert_eq!(error["error"]["type"], "backend_error");
    assert!(error["error"]["message"].as_str().unwrap().contains("upstream reset"));
    assert!(!frames.iter().any(Frame::is_done));
}

struct Client(Arc<AtomicBool>);

impl Transport for Client {
    fn is_connected(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn disconnect_stops_all_further_frames() {
    let connected = Arc::new(AtomicBool::new(true));
    let scope = CancelScope::enter(Some(Arc::new(Client(connected.clone()))));
    let token = scope.token();
    let header = Envelope::new(CHAT_COMPLETION_CHUNK, "echo-model");
    let frames = emit(header, chat_source(words(&["a", "b", "c"])), scope);
    futures_util::pin_mut!(frames);

    assert!(frames.next().await.is_some());
    connected.store(false, Ordering::SeqCst);
    assert!(frames.next().await.is_none());
    assert!(token.is_cancelled());
}

#[tokio::test]
async fn completion_stream_frames() {
    let source: ChunkStream<CompletionChunk> = boxed(stream::iter(
        ["one ", "two ", "three"]
            .map(|t| Ok(CompletionChoice::new(0, t).into())),
    ));
    let header = Envelope::new(TEXT_COMPLETION, "echo-model");
    let frames: Vec<Frame> = emit(header, source, CancelScope::detached()).collect().await;

    assert_eq!(frames.len(), 5);
    let texts: Vec<Value> = frames[..4].iter().map(|f| json(f)["choices"][0]["text"].clone()).collect();
    assert_eq!(texts, ["one ", "two ", "three", ""]);
    assert_eq!(json(&frames[3])["object"], TEXT_COMPLETION);
    assert_eq!(json(&frames[3])["choices"][0]["finish_reason"], "stop");
    assert!(frames[4].is_done());
}

#[tokio::test]
async fn collect_keeps_every_choice() {
    let header = Envelope::chat("echo-model");
    let envelope = collect(header, chat_source(words(&["x", "y", "z"])))
        .await
        .unwrap();

    assert_eq!(envelope.object, CHAT_COMPLETION);
    assert_eq!(envelope.choices.len(), 3);
    let usage = envelope.usage.unwrap();
    assert_eq!(usage.total_tokens, None);
}

#[tokio::test]
async fn collect_surfaces_backend_errors() {
    let items = vec![
        Ok(ChatChoice::assistant(0, "x").into()),
        Err(Error::backend(anyhow::anyhow!("gone"))),
    ];
    let err = collect(Envelope::chat("m"), chat_source(items)).await.unwrap_err();
    assert!(matches!(err, Error::Backend { .. }));
}

#[tokio::test]
async fn disconnect_while_source_is_idle_ends_the_stream() {
    let (tx, mut rx) = tokio::sync::mpsc::channel::<Frame>(8);
    let scope = CancelScope::enter(Some(Arc::new(tx.clone())));
    let token = scope.token();

    let dropped = Arc::new(AtomicBool::new(false));
    let guard = DropFlag(dropped.clone());
    let source = chat_source(words(&["a"])).chain(async_stream::stream! {
        let _guard = guard;
        futures_util::future::pending::<()>().await;
        let never: Result<ChatChunk, Error> = Ok(ChatChoice::assistant(0, "never").into());
        yield never;
    });
    let header = Envelope::new(CHAT_COMPLETION_CHUNK, "echo-model");
    let pump = tokio::spawn(async move {
        let frames = emit(header, boxed(source), scope);
        futures_util::pin_mut!(frames);
        let mut sent = 0;
        while let Some(frame) = frames.next().await {
            if tx.send(frame).await.is_err() {
                break;
            }
            sent += 1;
        }
        sent
    });

    let first = rx.recv().await.unwrap();
    assert_eq!(json(&first)["choices"][0]["delta"]["content"], "a");
    drop(rx);

    let sent = tokio::time::timeout(std::time::Duration::from_secs(2), pump)
        .await
        .expect("emitter noticed the disconnect")
        .unwrap();
    assert_eq!(sent, 1);
    assert!(token.is_cancelled());
    assert!(dropped.load(Ordering::SeqCst));
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}
