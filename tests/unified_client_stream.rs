mod common;

use std::time::Duration;

use common::{RecordingHandler, ScriptedTransport, StreamReply};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use unillm::config::ClientConfig;
use unillm::error::LLMError;
use unillm::strategy::{RequestKind, RequestSettings};
use unillm::{CallbackHandler, ChatRequest, ErrorKind, LLMClient, ProviderRegistry, create_client};

const OPENAI_FULL_BODY: &str = r#"{
    "id": "chatcmpl-1",
    "model": "gpt-4o-mini",
    "choices": [{"index": 0, "message": {"role": "assistant", "content": "full answer"}, "finish_reason": "stop"}],
    "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
}"#;

fn openai_client(transport: &std::sync::Arc<ScriptedTransport>) -> unillm::UnifiedClient {
    let config = ClientConfig::new("openai", "sk-test").with_base_url("https://api.example.com/v1");
    create_client(config, &ProviderRegistry::new(), transport.dyn_transport())
}

#[tokio::test]
async fn openai_sse_chunks_split_mid_line_are_reassembled() {
    let transport = ScriptedTransport::new();
    transport.push_stream(StreamReply::ok(
        "text/event-stream",
        &[
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\ndata: {\"choi",
            "ces\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\nda",
            "ta: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n: keep-alive\n",
            "data: [DONE]\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
        ],
    ));
    let client = openai_client(&transport);

    let mut handler = RecordingHandler::default();
    client
        .stream_chat(&ChatRequest::new("hi").with_system("be brief"), &mut handler)
        .await;

    assert_eq!(handler.chunks, ["Hel", "lo"]);
    assert!(handler.errors.is_empty(), "unexpected errors: {:?}", handler.errors);
    assert_eq!(handler.completed, 1);

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url, "https://api.example.com/v1/chat/completions");
    assert_eq!(requests[0].header("authorization"), Some("Bearer sk-test"));

    let body = transport.request_body(0);
    assert_eq!(body["stream"], json!(true));
    assert_eq!(body["model"], json!("gpt-4o-mini"));
    assert_eq!(body["messages"][0], json!({"role": "system", "content": "be brief"}));
    assert_eq!(body["messages"][1], json!({"role": "user", "content": "hi"}));
}

#[tokio::test]
async fn multibyte_characters_split_across_chunks_survive() {
    let payload = "data: {\"choices\":[{\"delta\":{\"content\":\"你好\"}}]}\n\n".as_bytes();
    let cut = payload
        .windows(3)
        .position(|window| window == "你".as_bytes())
        .expect("multibyte char")
        + 1;

    let transport = ScriptedTransport::new();
    transport.push_stream(StreamReply::Body {
        status: 200,
        content_type: Some("text/event-stream"),
        chunks: vec![Ok(payload[..cut].to_vec()), Ok(payload[cut..].to_vec())],
        hang: false,
    });
    let client = openai_client(&transport);

    let mut handler = RecordingHandler::default();
    client.stream_chat(&ChatRequest::new("hi"), &mut handler).await;

    assert_eq!(handler.text(), "你好");
    assert_eq!(handler.completed, 1);
}

#[tokio::test]
async fn transport_failure_falls_back_to_single_request() {
    let transport = ScriptedTransport::new();
    transport.push_stream(StreamReply::Fail(LLMError::connection("streaming unsupported")));
    transport.push_reply(200, OPENAI_FULL_BODY);
    let client = openai_client(&transport);

    let mut handler = RecordingHandler::default();
    client.stream_chat(&ChatRequest::new("hi"), &mut handler).await;

    assert_eq!(handler.chunks, ["full answer"]);
    assert!(handler.errors.is_empty());
    assert_eq!(handler.completed, 1);

    assert_eq!(transport.requests().len(), 2);
    assert_eq!(transport.request_body(0)["stream"], json!(true));
    assert_eq!(transport.request_body(1)["stream"], json!(false));
}

#[tokio::test]
async fn failed_fallback_reports_classified_error() {
    let transport = ScriptedTransport::new();
    transport.push_stream(StreamReply::Fail(LLMError::connection("reset")));
    transport.push_reply(401, r#"{"error":{"message":"Incorrect API key provided"}}"#);
    let client = openai_client(&transport);

    let mut handler = RecordingHandler::default();
    client.stream_chat(&ChatRequest::new("hi"), &mut handler).await;

    assert!(handler.chunks.is_empty());
    assert_eq!(handler.completed, 0);
    match handler.errors.as_slice() {
        [LLMError::Auth { message, context }] => {
            assert_eq!(message, "Incorrect API key provided");
            assert_eq!(context.status, Some(401));
            assert_eq!(context.provider.as_deref(), Some("openai"));
        }
        other => panic!("unexpected errors: {other:?}"),
    }
}

#[tokio::test]
async fn error_status_is_classified_without_fallback() {
    let transport = ScriptedTransport::new();
    transport.push_stream(StreamReply::Body {
        status: 429,
        content_type: Some("application/json"),
        chunks: vec![Ok(br#"{"error":{"message":"Rate limit reached"}}"#.to_vec())],
        hang: false,
    });
    let client = openai_client(&transport);

    let mut handler = RecordingHandler::default();
    client.stream_chat(&ChatRequest::new("hi"), &mut handler).await;

    assert_eq!(transport.requests().len(), 1, "non-2xx must not trigger fallback");
    assert_eq!(handler.completed, 0);
    assert_eq!(handler.errors.len(), 1);
    let err = &handler.errors[0];
    assert_eq!(err.kind(), ErrorKind::Quota);
    assert_eq!(err.message(), "Rate limit reached");
    assert_eq!(err.status(), Some(429));
    assert_eq!(err.context().endpoint.as_deref(), Some("/chat/completions"));
}

#[tokio::test]
async fn mid_stream_failure_keeps_delivered_chunks() {
    let transport = ScriptedTransport::new();
    transport.push_stream(StreamReply::Body {
        status: 200,
        content_type: Some("text/event-stream"),
        chunks: vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n".to_vec()),
            Err(LLMError::connection("connection reset by peer")),
        ],
        hang: false,
    });
    let client = openai_client(&transport);

    let mut handler = RecordingHandler::default();
    client.stream_chat(&ChatRequest::new("hi"), &mut handler).await;

    assert_eq!(handler.chunks, ["Hel"]);
    assert_eq!(handler.completed, 0);
    assert_eq!(transport.requests().len(), 1);
    match handler.errors.as_slice() {
        [LLMError::Connection { message, aborted, .. }] => {
            assert_eq!(message, "connection reset by peer");
            assert!(!aborted);
        }
        other => panic!("unexpected errors: {other:?}"),
    }
}

#[tokio::test]
async fn pre_cancelled_token_sends_nothing() {
    let transport = ScriptedTransport::new();
    let client = openai_client(&transport);

    let token = CancellationToken::new();
    token.cancel();
    let mut handler = RecordingHandler {
        token: Some(token),
        ..RecordingHandler::default()
    };
    client.stream_chat(&ChatRequest::new("hi"), &mut handler).await;

    assert!(transport.requests().is_empty());
    assert_eq!(handler.completed, 0);
    assert_eq!(handler.errors.len(), 1);
    assert!(handler.errors[0].is_aborted());
    assert_eq!(handler.errors[0].kind(), ErrorKind::Connection);
}

#[tokio::test]
async fn cancelling_inside_on_data_stops_the_stream() {
    let transport = ScriptedTransport::new();
    transport.push_stream(StreamReply::ok(
        "text/event-stream",
        &[
            "data: {\"choices\":[{\"delta\":{\"content\":\"one\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"two\"}}]}\n\n",
        ],
    ));
    let client = openai_client(&transport);

    let mut handler = RecordingHandler {
        token: Some(CancellationToken::new()),
        cancel_after: Some(1),
        ..RecordingHandler::default()
    };
    client.stream_chat(&ChatRequest::new("hi"), &mut handler).await;

    assert_eq!(handler.chunks, ["one"]);
    assert_eq!(handler.completed, 0);
    assert_eq!(handler.errors.len(), 1);
    assert!(handler.errors[0].is_aborted());
}

#[tokio::test]
async fn cancelling_while_waiting_for_data_aborts() {
    let transport = ScriptedTransport::new();
    transport.push_stream(StreamReply::Body {
        status: 200,
        content_type: Some("text/event-stream"),
        chunks: vec![Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n".to_vec())],
        hang: true,
    });
    let client = openai_client(&transport);

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let mut chunks = Vec::new();
    let mut errors = Vec::new();
    let mut completed = false;
    {
        let mut handler = CallbackHandler::new(
            |chunk| chunks.push(chunk.to_string()),
            |err| errors.push(err),
        )
        .with_on_complete(|| completed = true)
        .with_cancellation(token);
        tokio::time::timeout(
            Duration::from_secs(5),
            client.stream_chat(&ChatRequest::new("hi"), &mut handler),
        )
        .await
        .expect("stream should stop once cancelled");
    }

    assert_eq!(chunks, ["partial"]);
    assert!(!completed);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].is_aborted());
}

#[tokio::test]
async fn gemini_streams_from_sse_method_with_query_key() {
    let transport = ScriptedTransport::new();
    transport.push_stream(StreamReply::ok(
        "text/event-stream",
        &[
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Bon\"}],\"role\":\"model\"}}]}\r\n\r\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"jour\"}],\"role\":\"model\"}}]}\r\n\r\n",
        ],
    ));
    let config = ClientConfig::new("gemini", "g-key")
        .with_base_url("https://gen.example.com/v1beta")
        .with_model("models/gemini-pro");
    let client = create_client(config, &ProviderRegistry::new(), transport.dyn_transport());

    let mut handler = RecordingHandler::default();
    client.stream_chat(&ChatRequest::new("hi"), &mut handler).await;

    assert_eq!(handler.text(), "Bonjour");
    assert_eq!(handler.completed, 1);

    let requests = transport.requests();
    assert_eq!(
        requests[0].url,
        "https://gen.example.com/v1beta/models/gemini-pro:streamGenerateContent?alt=sse&key=g-key"
    );
    assert!(requests[0].header("authorization").is_none());

    let body = transport.request_body(0);
    assert!(body.get("stream").is_none());
    assert_eq!(body["contents"][0]["role"], json!("user"));
}

#[tokio::test]
async fn ollama_ndjson_stream_is_split_on_objects() {
    let transport = ScriptedTransport::new();
    transport.push_stream(StreamReply::ok(
        "application/x-ndjson",
        &[
            "{\"model\":\"qwen3:32b\",\"message\":{\"role\":\"assistant\",\"content\":\"He\"},\"done\":false}\n{\"mess",
            "age\":{\"role\":\"assistant\",\"content\":\"y {}\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true,\"eval_count\":2}\n",
        ],
    ));
    let client = create_client(
        ClientConfig::new("ollama", ""),
        &ProviderRegistry::new(),
        transport.dyn_transport(),
    );

    let mut handler = RecordingHandler::default();
    client.stream_chat(&ChatRequest::new("hi"), &mut handler).await;

    assert_eq!(handler.chunks, ["He", "y {}"]);
    assert_eq!(handler.completed, 1);

    let requests = transport.requests();
    assert_eq!(requests[0].url, "http://localhost:11434/api/chat");
    assert!(requests[0].header("authorization").is_none());
    assert_eq!(transport.request_body(0)["stream"], json!(true));
}

#[tokio::test]
async fn plain_text_stream_flushes_unterminated_tail() {
    let transport = ScriptedTransport::new();
    transport.push_stream(StreamReply::ok("text/plain", &["Hello wor", "ld\nsecond line"]));
    let client = openai_client(&transport);

    let mut handler = RecordingHandler::default();
    client.stream_chat(&ChatRequest::new("hi"), &mut handler).await;

    assert_eq!(handler.chunks, ["Hello world", "second line"]);
    assert_eq!(handler.completed, 1);
}

#[tokio::test]
async fn custom_formatter_failure_is_reported_before_sending() {
    let transport = ScriptedTransport::new();
    let config = ClientConfig::new("openai", "sk-test").with_request(
        RequestSettings::new(RequestKind::Custom)
            .with_format_fn(|_request| Err(LLMError::request_format("template missing"))),
    );
    let client = create_client(config, &ProviderRegistry::new(), transport.dyn_transport());

    let mut handler = RecordingHandler::default();
    client.stream_chat(&ChatRequest::new("hi"), &mut handler).await;

    assert!(transport.requests().is_empty());
    assert_eq!(handler.completed, 0);
    match handler.errors.as_slice() {
        [LLMError::RequestFormat { message, context }] => {
            assert_eq!(message, "template missing");
            assert_eq!(context.provider.as_deref(), Some("openai"));
        }
        other => panic!("unexpected errors: {other:?}"),
    }
}

#[tokio::test]
async fn bare_json_lines_with_unterminated_done() {
    let transport = ScriptedTransport::new();
    transport.push_stream(StreamReply::ok(
        "text/event-stream",
        &[
            "{\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n{\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\ndata: [DONE]",
        ],
    ));
    let client = openai_client(&transport);

    let mut handler = RecordingHandler::default();
    client.stream_chat(&ChatRequest::new("hi"), &mut handler).await;

    assert_eq!(handler.chunks, ["Hel", "lo"]);
    assert!(handler.errors.is_empty(), "unexpected errors: {:?}", handler.errors);
    assert_eq!(handler.completed, 1);
}

#[tokio::test]
async fn cancel_on_trailing_frame_aborts_instead_of_completing() {
    let transport = ScriptedTransport::new();
    transport.push_stream(StreamReply::ok("text/plain", &["only tail no newline"]));
    let client = openai_client(&transport);

    let mut handler = RecordingHandler {
        token: Some(CancellationToken::new()),
        cancel_after: Some(1),
        ..RecordingHandler::default()
    };
    client.stream_chat(&ChatRequest::new("hi"), &mut handler).await;

    assert_eq!(handler.chunks, ["only tail no newline"]);
    assert_eq!(handler.completed, 0);
    assert_eq!(handler.errors.len(), 1);
    assert!(handler.errors[0].is_aborted());
    assert_eq!(handler.errors[0].context().provider.as_deref(), Some("openai"));
}

#[tokio::test]
async fn cancel_on_fallback_chunk_aborts_instead_of_completing() {
    let transport = ScriptedTransport::new();
    transport.push_stream(StreamReply::Fail(LLMError::connection("streaming unsupported")));
    transport.push_reply(200, OPENAI_FULL_BODY);
    let client = openai_client(&transport);

    let mut handler = RecordingHandler {
        token: Some(CancellationToken::new()),
        cancel_after: Some(1),
        ..RecordingHandler::default()
    };
    client.stream_chat(&ChatRequest::new("hi"), &mut handler).await;

    assert_eq!(handler.chunks, ["full answer"]);
    assert_eq!(handler.completed, 0);
    assert_eq!(handler.errors.len(), 1);
    assert!(handler.errors[0].is_aborted());
}
