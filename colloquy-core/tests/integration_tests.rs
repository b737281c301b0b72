//! End-to-end conversation tests against a mocked chat completions API

use colloquy_core::conversation::{
    ConversationOrchestrator, ExtraParams, RequiredStartRole, SessionStore, TrimPolicy,
};
use colloquy_core::llm::providers::GroqProvider;
use colloquy_core::llm::MessageRole;
use futures::StreamExt;
use serde_json::{Value, json};
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn completion(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{"message": {"role": "assistant", "content": content}}],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
    }))
}

async fn groq(server: &MockServer) -> Arc<GroqProvider> {
    Arc::new(
        GroqProvider::with_options("gsk-test", "llama3-8b-8192", server.uri(), None)
            .expect("provider"),
    )
}

async fn sent_messages(server: &MockServer) -> Vec<Vec<(String, String)>> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|request| {
            let body: Value = request.body_json().expect("json body");
            body["messages"]
                .as_array()
                .cloned()
                .unwrap_or_default()
                .iter()
                .map(|m| {
                    (
                        m["role"].as_str().unwrap_or_default().to_string(),
                        m["content"].as_str().unwrap_or_default().to_string(),
                    )
                })
                .collect()
        })
        .collect()
}

#[tokio::test]
async fn test_chatbot_remembers_within_session_only() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(completion("Hello Bob!"))
        .mount(&server)
        .await;

    let chat = ConversationOrchestrator::new(
        Arc::new(SessionStore::new()),
        groq(&server).await,
        TrimPolicy::default(),
    )
    .unwrap();

    chat.invoke("abc2", "hi! I'm Bob", &ExtraParams::new())
        .await
        .unwrap();
    chat.invoke("abc2", "what's my name?", &ExtraParams::new())
        .await
        .unwrap();
    chat.invoke("abc3", "what's my name?", &ExtraParams::new())
        .await
        .unwrap();

    let sent = sent_messages(&server).await;
    assert_eq!(sent.len(), 3);
    assert_eq!(
        sent[1],
        vec![
            ("user".to_string(), "hi! I'm Bob".to_string()),
            ("assistant".to_string(), "Hello Bob!".to_string()),
            ("user".to_string(), "what's my name?".to_string()),
        ]
    );
    assert!(sent[2].iter().all(|(_, content)| !content.contains("Bob")));
}

#[tokio::test]
async fn test_language_system_prompt_and_trimming() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(completion("¡Hola Todd!"))
        .mount(&server)
        .await;

    let policy = TrimPolicy::keep_last(30)
        .unwrap()
        .with_required_start_role(RequiredStartRole::User);
    let chat = ConversationOrchestrator::new(Arc::new(SessionStore::new()), groq(&server).await, policy)
        .unwrap()
        .with_system_prompt(
            "You are a helpful assistant. Answer all questions to the best of your ability in {language}.",
        );

    let params = ExtraParams::from([("language".to_string(), "Spanish".to_string())]);
    for question in ["hi! I'm todd", "whats 2 + 2", "what's my name?"] {
        chat.invoke("abc11", question, &params).await.unwrap();
    }

    let sent = sent_messages(&server).await;
    let last = sent.last().unwrap();
    assert_eq!(last[0].0, "system");
    assert!(last[0].1.ends_with("in Spanish."));
    assert_eq!(last[1].0, "user");
    assert_eq!(last.last().unwrap().1, "what's my name?");
    // Older turns were dropped from the request but kept in the store
    assert!(last.len() < 7);
    let stored = chat.store().read("abc11");
    assert_eq!(stored.len(), 6);
    assert!(stored.iter().all(|m| m.role() != MessageRole::System));
}

#[tokio::test]
async fn test_provider_error_leaves_history_untouched() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "error": {"message": "over capacity", "type": "service_unavailable"}
        })))
        .mount(&server)
        .await;

    let store = Arc::new(SessionStore::new());
    let chat = ConversationOrchestrator::new(store.clone(), groq(&server).await, TrimPolicy::default())
        .unwrap();

    let err = chat
        .invoke("abc2", "hi! I'm Bob", &ExtraParams::new())
        .await
        .unwrap_err();
    assert!(err.is_generation_failure());
    assert!(err.to_string().contains("over capacity"));
    assert!(store.read("abc2").is_empty());
}

#[tokio::test]
async fn test_streamed_reply_is_recorded() {
    let server = MockServer::start().await;
    let sse = [
        r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#,
        r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#,
        r#"data: {"choices":[{"delta":{"content":" Todd!"}}]}"#,
        "data: [DONE]",
    ]
    .map(|line| format!("{line}\n\n"))
    .concat();
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse),
        )
        .mount(&server)
        .await;

    let chat = ConversationOrchestrator::new(
        Arc::new(SessionStore::new()),
        groq(&server).await,
        TrimPolicy::default(),
    )
    .unwrap();

    let fragments: Vec<String> = chat
        .stream("abc15", "hi I'm Todd", &ExtraParams::new())
        .map(|f| f.unwrap())
        .collect()
        .await;
    assert_eq!(fragments, vec!["Hi", " Todd!"]);

    let stored = chat.store().read("abc15");
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].content(), "Hi Todd!");
}
