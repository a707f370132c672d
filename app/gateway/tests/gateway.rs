//! End-to-end tests over HTTP against a served gateway.

use anyhow::Result;
use ferry_gateway::{
    Gateway, GatewayConfig, ServeHandle, StaticSource,
    backend::{AppDirectory, AppInfo, ModelActivator, ProviderModel, echo_text},
    serve_gateway, serve_with_config,
};
use futures_util::stream;
use llm::{
    Capabilities, ChatChoice, ChatChunk, ChatRequest, CompletionChoice, CompletionChunk,
    CompletionRequest, Frame, ModelInfo,
};
use runtime::{ChunkStream, Error, Model, ModelRegistry, ModelSource, boxed};
use serde_json::{Value, json};
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

fn scripted(id: &str, words: &'static [&'static str]) -> Model {
    Model::new(ModelInfo::new(id, "test", Capabilities::ALL))
        .with_chat(move |_: ChatRequest| -> ChunkStream<ChatChunk> {
            boxed(stream::iter(
                words.iter().map(|w| Ok(ChatChoice::assistant(0, *w).into())),
            ))
        })
        .with_completion(move |_: CompletionRequest| -> ChunkStream<CompletionChunk> {
            boxed(stream::iter(
                words.iter().map(|w| Ok(CompletionChoice::new(0, *w).into())),
            ))
        })
}

fn chat_only(id: &str) -> Model {
    Model::new(ModelInfo::new(id, "test", Capabilities::CHAT)).with_chat(
        |_: ChatRequest| -> ChunkStream<ChatChunk> {
            boxed(stream::iter([Ok(ChatChoice::assistant(0, "only chat").into())]))
        },
    )
}

fn failing(id: &str) -> Model {
    Model::new(ModelInfo::new(id, "test", Capabilities::CHAT)).with_chat(
        |_: ChatRequest| -> ChunkStream<ChatChunk> {
            boxed(stream::iter([
                Ok(ChatChoice::assistant(0, "partial").into()),
                Err(Error::backend(anyhow::anyhow!("upstream reset"))),
            ]))
        },
    )
}

struct Dropped(Arc<AtomicBool>);

impl Drop for Dropped {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Streams a word every few milliseconds until dropped.
fn endless(id: &str, dropped: Arc<AtomicBool>) -> Model {
    Model::new(ModelInfo::new(id, "test", Capabilities::CHAT)).with_chat(
        move |_: ChatRequest| -> ChunkStream<ChatChunk> {
            let guard = Dropped(dropped.clone());
            boxed(async_stream::stream! {
                let _guard = guard;
                loop {
                    let tick: Result<ChatChunk, Error> = Ok(ChatChoice::assistant(0, "tick ").into());
                    yield tick;
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
            })
        },
    )
}

/// A console that already knows some provider models.
#[derive(Default)]
struct KnownModels(Mutex<Vec<String>>);

impl AppDirectory for KnownModels {
    fn list_apps(&self) -> Result<Vec<AppInfo>> {
        Ok(Vec::new())
    }

    fn api_key(&self, app_id: &str) -> Result<String> {
        anyhow::bail!("no app {app_id}")
    }

    fn provider_models(&self) -> Result<Vec<String>> {
        Ok(self.0.lock().unwrap().clone())
    }

    fn add_provider_model(&self, model: &ProviderModel) -> Result<()> {
        self.0.lock().unwrap().push(model.model.clone());
        Ok(())
    }
}

struct Served {
    handle: ServeHandle,
    base: String,
    client: reqwest::Client,
}

impl Served {
    async fn start(models: Vec<Model>) -> Self {
        let source: Arc<dyn ModelSource> = Arc::new(StaticSource::new("test", models));
        let gateway = Gateway::new(Arc::new(ModelRegistry::new()), vec![source]);
        gateway.reload().await;
        Self::over(serve_gateway(gateway, "127.0.0.1:0").await.unwrap())
    }

    fn over(handle: ServeHandle) -> Self {
        let base = format!("http://127.0.0.1:{}/v1", handle.port);
        Self {
            handle,
            base,
            client: reqwest::Client::new(),
        }
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let response = self
            .client
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }

    async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}{path}", self.base))
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn frames(&self, path: &str, body: Value) -> Vec<Frame> {
        let response = self.post(path, body).await;
        assert_eq!(response.status(), 200);
        assert_eq!(
            response.headers()["content-type"].to_str().unwrap(),
            "text/event-stream"
        );
        Frame::parse_all(&response.text().await.unwrap())
    }
}

fn json(frame: &Frame) -> Value {
    serde_json::from_str(frame.data().expect("data frame")).unwrap()
}

fn user(text: &str) -> Value {
    json!([{ "role": "user", "content": text }])
}

#[tokio::test]
async fn lists_and_describes_models() {
    let served = Served::start(vec![scripted("alpha", &["a"]), chat_only("beta")]).await;

    let (status, list) = served.get("/models").await;
    assert_eq!(status, 200);
    assert_eq!(list["object"], "list");
    assert_eq!(list["data"][0]["id"], "alpha");
    assert_eq!(list["data"][1]["id"], "beta");

    let (status, model) = served.get("/models/beta").await;
    assert_eq!(status, 200);
    assert_eq!(model["owned_by"], "test");

    let (status, err) = served.get("/models/gamma").await;
    assert_eq!(status, 404);
    assert_eq!(err["error"]["type"], "model_not_found");

    served.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn reload_reports_model_count() {
    let served = Served::start(vec![scripted("alpha", &["a"]), chat_only("beta")]).await;
    let (status, body) = served.get("/models/reload").await;
    assert_eq!(status, 200);
    assert_eq!(body["message"], "Models reloaded");
    assert_eq!(body["count"], 2);
    served.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn chat_without_stream_collects_every_choice() {
    let served = Served::start(vec![scripted("alpha", &["a", "b", "c"])]).await;
    let response = served
        .post("/chat/completions", json!({ "model": "alpha", "messages": user("hi") }))
        .await;
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["model"], "alpha");
    assert_eq!(body["choices"].as_array().unwrap().len(), 3);
    assert_eq!(body["choices"][1]["message"]["content"], "b");
    assert!(body["usage"]["prompt_tokens"].is_null());
    served.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn completion_stream_ends_with_stop_and_done() {
    let served = Served::start(vec![scripted("alpha", &["x", "y", "z"])]).await;
    let frames = served
        .frames(
            "/completions",
            json!({ "model": "alpha", "prompt": "go", "stream": true }),
        )
        .await;

    assert_eq!(frames.len(), 5);
    let first = json(&frames[0]);
    assert_eq!(first["object"], "text_completion");
    assert_eq!(first["choices"][0]["text"], "x");
    let ids: Vec<_> = frames[..4].iter().map(|f| json(f)["id"].clone()).collect();
    assert!(ids.iter().all(|id| *id == ids[0]));
    assert_eq!(json(&frames[3])["choices"][0]["finish_reason"], "stop");
    assert!(frames[4].is_done());
    served.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn chat_stream_frames_are_chunks() {
    let served = Served::start(vec![scripted("alpha", &["a", "b"])]).await;
    let frames = served
        .frames(
            "/chat/completions",
            json!({ "model": "alpha", "messages": user("hi"), "stream": true }),
        )
        .await;

    assert_eq!(frames.len(), 4);
    assert_eq!(json(&frames[0])["object"], "chat.completion.chunk");
    assert_eq!(json(&frames[1])["choices"][0]["delta"]["content"], "b");
    assert!(frames[3].is_done());
    served.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_model_is_not_found() {
    let served = Served::start(vec![scripted("alpha", &["a"])]).await;
    let response = served
        .post("/chat/completions", json!({ "model": "missing", "messages": user("hi") }))
        .await;
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "model_not_found");
    served.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn unsupported_capability_is_rejected_before_streaming() {
    let served = Served::start(vec![chat_only("beta")]).await;
    let response = served
        .post(
            "/completions",
            json!({ "model": "beta", "prompt": "go", "stream": true }),
        )
        .await;
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "invalid_request_error");
    served.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn malformed_body_is_a_bad_request() {
    let served = Served::start(vec![scripted("alpha", &["a"])]).await;
    let response = served
        .client
        .post(format!("{}/chat/completions", served.base))
        .header("content-type", "application/json")
        .body("{\"model\":")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "invalid_request_error");
    served.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn backend_failure_mid_stream_ends_with_error_frame() {
    let served = Served::start(vec![failing("broken")]).await;
    let frames = served
        .frames(
            "/chat/completions",
            json!({ "model": "broken", "messages": user("hi"), "stream": true }),
        )
        .await;

    assert_eq!(frames.len(), 2);
    assert_eq!(json(&frames[0])["choices"][0]["delta"]["content"], "partial");
    let err = json(&frames[1]);
    assert_eq!(err["error"]["type"], "backend_error");
    assert!(err["error"]["message"].as_str().unwrap().contains("upstream reset"));
    assert!(!frames.iter().any(Frame::is_done));
    served.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn backend_failure_without_stream_is_bad_gateway() {
    let served = Served::start(vec![failing("broken")]).await;
    let response = served
        .post("/chat/completions", json!({ "model": "broken", "messages": user("hi") }))
        .await;
    assert_eq!(response.status(), 502);
    served.handle.shutdown().await.unwrap();
}

fn echo_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.echo.delay_ms = 0;
    config
}

#[tokio::test]
async fn configured_echo_model_streams_its_echo() {
    let dir = tempfile::tempdir().unwrap();
    let handle = serve_with_config(&echo_config(), dir.path(), Some("127.0.0.1:0"))
        .await
        .unwrap();
    let served = Served::over(handle);

    let frames = served
        .frames(
            "/chat/completions",
            json!({ "model": "echo-model", "messages": user("ping"), "stream": true }),
        )
        .await;
    let text: String = frames
        .iter()
        .filter(|f| !f.is_done())
        .filter_map(|f| json(f)["choices"][0]["delta"]["content"].as_str().map(str::to_owned))
        .collect();
    assert_eq!(text, echo_text("user: ping\n"));
    served.handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn task_model_writes_a_transcript() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = echo_config();
    config.task.run.max_rounds = 2;
    let handle = serve_with_config(&config, dir.path(), Some("127.0.0.1:0"))
        .await
        .unwrap();
    let served = Served::over(handle);

    let response = served
        .post(
            "/chat/completions",
            json!({ "model": "run-task-model", "messages": user("ping") }),
        )
        .await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    let choices = body["choices"].as_array().unwrap();
    assert_eq!(choices.last().unwrap()["finish_reason"], "stop");
    assert_eq!(
        choices.iter().filter(|c| !c["finish_reason"].is_null()).count(),
        1
    );

    let logs: Vec<_> = std::fs::read_dir(dir.path().join("logs"))
        .unwrap()
        .collect();
    assert_eq!(logs.len(), 1);
    served.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn client_disconnect_stops_the_generation() {
    let dropped = Arc::new(AtomicBool::new(false));
    let served = Served::start(vec![endless("forever", dropped.clone())]).await;

    let mut response = served
        .post(
            "/chat/completions",
            json!({ "model": "forever", "messages": user("go"), "stream": true }),
        )
        .await;
    assert_eq!(response.status(), 200);
    let first = response.chunk().await.unwrap().unwrap();
    assert!(first.starts_with(b"data: "));
    drop(response);

    for _ in 0..100 {
        if dropped.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(dropped.load(Ordering::SeqCst));
    served.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn activation_needs_a_console() {
    let served = Served::start(vec![chat_only("beta")]).await;
    let response = served.post("/apps/models/activate", json!({})).await;
    assert_eq!(response.status(), 404);
    served.handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn activation_pushes_served_chat_models() {
    let console = Arc::new(KnownModels::default());
    console.0.lock().unwrap().push("alpha".into());
    let source: Arc<dyn ModelSource> = Arc::new(StaticSource::new(
        "test",
        vec![scripted("alpha", &["a"]), chat_only("beta")],
    ));
    let gateway = Gateway::new(Arc::new(ModelRegistry::new()), vec![source]).with_activator(
        ModelActivator::new(console.clone(), "http://gateway.local/v1", "apps"),
    );
    gateway.reload().await;
    let served = Served::over(serve_gateway(gateway, "127.0.0.1:0").await.unwrap());

    let response = served.post("/apps/models/activate", json!({})).await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    let activated: Vec<_> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["model"].as_str().unwrap().to_owned())
        .collect();
    assert_eq!(activated, ["alpha", "beta"]);
    assert_eq!(body[1]["credentials"]["endpoint_url"], "http://gateway.local/v1");
    assert_eq!(*console.0.lock().unwrap(), ["alpha", "beta"]);

    served.post("/apps/models/activate", json!({})).await;
    assert_eq!(console.0.lock().unwrap().len(), 2);
    served.handle.shutdown().await.unwrap();
}
