//! OpenAI-compatible provider against a mock HTTP server.

use colloquy_llm::openai::OpenAiProvider;
use colloquy_llm::provider::{ContentPart, ToolCallRequest, ToolSpec};
use colloquy_llm::{LanguageModel, LlmError, ModelMessage, ModelRequest, ProviderChunk};
use colloquy_types::events::FinishReason;
use futures_util::StreamExt;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider(server: &MockServer) -> OpenAiProvider {
    OpenAiProvider::new(reqwest::Client::new(), &server.uri(), "sk-test", "gpt-4o")
}

fn user(text: &str) -> ModelRequest {
    ModelRequest {
        system: "be helpful".into(),
        messages: vec![ModelMessage::User(vec![ContentPart::Text(text.into())])],
        tools: vec![],
    }
}

fn sse(lines: &[serde_json::Value]) -> String {
    let mut body = String::new();
    for line in lines {
        body.push_str(&format!("data: {}\n\n", line));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

#[tokio::test]
async fn streams_text_and_assembles_tool_calls() {
    let server = MockServer::start().await;
    let body = sse(&[
        json!({"choices":[{"index":0,"delta":{"role":"assistant","content":"Let me check."},"finish_reason":null}]}),
        json!({"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"getInformation","arguments":"{\"question\":"}}]},"finish_reason":null}]}),
        json!({"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"x\"}"}}]},"finish_reason":null}]}),
        json!({"choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}),
    ]);

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({"model": "gpt-4o", "stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let mut request = user("what is x?");
    request.tools.push(ToolSpec {
        name: "getInformation".into(),
        description: "kb".into(),
        parameters: json!({"type": "object"}),
    });

    let chunks: Vec<_> = provider(&server)
        .stream(request)
        .await
        .unwrap()
        .map(|c| c.unwrap())
        .collect()
        .await;

    assert_eq!(
        chunks,
        vec![
            ProviderChunk::TextDelta("Let me check.".into()),
            ProviderChunk::ToolCall(ToolCallRequest {
                id: "call_1".into(),
                name: "getInformation".into(),
                arguments: json!({"question": "x"}),
            }),
            ProviderChunk::Finish(FinishReason::ToolCalls),
        ]
    );
}

#[tokio::test]
async fn non_success_status_is_a_provider_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let err = match provider(&server).stream(user("hi")).await {
        Ok(_) => panic!("expected an error"),
        Err(e) => e,
    };
    match err {
        LlmError::Provider { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "overloaded");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn stream_cut_before_finish_is_an_error() {
    let server = MockServer::start().await;
    let body = "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"},\"finish_reason\":null}]}\n\n";
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let items: Vec<_> = provider(&server).stream(user("hi")).await.unwrap().collect().await;
    assert_eq!(items.len(), 2);
    assert!(matches!(items[0], Ok(ProviderChunk::TextDelta(ref t)) if t == "Hel"));
    assert!(matches!(items[1], Err(LlmError::UnexpectedEnd)));
}

#[tokio::test]
async fn complete_returns_message_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Greeting"}, "finish_reason": "stop"}]
        })))
        .mount(&server)
        .await;

    let text = provider(&server).complete(user("Hello")).await.unwrap();
    assert_eq!(text, "Greeting");
}
