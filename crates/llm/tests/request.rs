//! Tests for request parsing.

use ferry_llm::{ChatRequest, CompletionRequest, Prompt, Role, Stop};

#[test]
fn chat_request_minimal() {
    let json = r#"{"model":"echo-model","messages":[{"role":"user","content":"hello"}]}"#;
    let req: ChatRequest = serde_json::from_str(json).unwrap();
    assert_eq!(req.model.as_str(), "echo-model");
    assert!(!req.stream);
    assert_eq!(req.messages[0].role, Role::User);
    assert_eq!(req.render(), "user: hello\n");
}

#[test]
fn chat_request_stop_forms() {
    let one: ChatRequest =
        serde_json::from_str(r#"{"model":"m","messages":[],"stop":"\n"}"#).unwrap();
    assert_eq!(one.stop, Some(Stop::One("\n".into())));

    let many: ChatRequest =
        serde_json::from_str(r#"{"model":"m","messages":[],"stop":["a","b"]}"#).unwrap();
    assert_eq!(many.stop, Some(Stop::Many(vec!["a".into(), "b".into()])));
}

#[test]
fn completion_prompt_forms() {
    let text: CompletionRequest =
        serde_json::from_str(r#"{"model":"m","prompt":"once","stream":true}"#).unwrap();
    assert_eq!(text.prompt, Prompt::Text("once".into()));
    assert!(text.stream);

    let batch: CompletionRequest =
        serde_json::from_str(r#"{"model":"m","prompt":["a","b"]}"#).unwrap();
    assert_eq!(batch.prompt.joined(), "a\nb");
}
