// SPDX-License-Identifier: Apache-2.0

//! AI backends against local mock endpoints.

use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::IntoResponse;
use futures::{StreamExt, TryStreamExt, stream};
use repomind_core::ai::{AnthropicClient, ClusterAiClient, GeminiClient, OpenAiClient};
use repomind_core::{
    AiConfig, AiProvider, BackendConfig, ClusterAiConfig, FunctionDeclaration, GenerateOptions,
    RepoMindError, create_provider,
};
use serde_json::{Value, json};

/// A request seen by the mock.
#[derive(Debug, Clone)]
struct Seen {
    path: String,
    headers: HeaderMap,
    body: Value,
}

type Log = Arc<Mutex<Vec<Seen>>>;

/// Answers every request with one canned response and records what it saw.
async fn spawn_mock(status: StatusCode, content_type: &'static str, body: String) -> (String, Log) {
    let log: Log = Arc::default();
    let recorder = log.clone();

    let app = Router::new().fallback(move |uri: Uri, headers: HeaderMap, raw: Bytes| {
        let recorder = recorder.clone();
        let body = body.clone();
        async move {
            recorder.lock().expect("log lock").push(Seen {
                path: uri
                    .path_and_query()
                    .map_or_else(|| uri.path().to_string(), ToString::to_string),
                headers,
                body: serde_json::from_slice(&raw).unwrap_or(Value::Null),
            });
            (status, [(header::CONTENT_TYPE, content_type)], body).into_response()
        }
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), log)
}

/// Sends the body in parts, sleeping before each part for its delay.
async fn spawn_slow_mock(content_type: &'static str, parts: Vec<(Duration, String)>) -> String {
    let app = Router::new().fallback(move || {
        let parts = parts.clone();
        async move {
            let body = stream::iter(parts).then(|(delay, part)| async move {
                tokio::time::sleep(delay).await;
                Ok::<_, Infallible>(part)
            });
            ([(header::CONTENT_TYPE, content_type)], Body::from_stream(body)).into_response()
        }
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

fn only_request(log: &Log) -> Seen {
    let seen = log.lock().expect("log lock");
    assert_eq!(seen.len(), 1, "expected exactly one request");
    seen[0].clone()
}

fn sse(events: &[Value]) -> String {
    events.iter().map(|e| format!("data: {e}\n\n")).collect()
}

fn select_files() -> FunctionDeclaration {
    FunctionDeclaration {
        name: "select_files".to_string(),
        description: "Pick files".to_string(),
        parameters: json!({
            "type": "object",
            "properties": { "files": { "type": "array", "items": { "type": "string" } } },
            "required": ["files"]
        }),
    }
}

fn backend(base_url: String, model: &str) -> BackendConfig {
    BackendConfig {
        api_key: Some("test-key".to_string()),
        model: Some(model.to_string()),
        base_url: Some(base_url),
    }
}

fn quiet(config: AiConfig) -> AiConfig {
    AiConfig {
        max_retries: 0,
        timeout_seconds: 5,
        ..config
    }
}

// ---------------------------------------------------------------------------
// Gemini
// ---------------------------------------------------------------------------

#[tokio::test]
async fn gemini_function_call_is_normalized() {
    let response = json!({
        "candidates": [{
            "content": {
                "role": "model",
                "parts": [{ "functionCall": { "name": "select_files", "args": { "files": ["src/lib.rs"] } } }]
            }
        }]
    });
    let (base, log) = spawn_mock(StatusCode::OK, "application/json", response.to_string()).await;
    let client = GeminiClient::new(&quiet(AiConfig {
        gemini: backend(format!("{base}/v1beta"), "gemini-test"),
        ..AiConfig::default()
    }))
    .expect("client");

    let result = client
        .generate_with_functions("Which files?", &[select_files()], &GenerateOptions::default())
        .await
        .expect("function call");

    assert_eq!(result.function_calls.len(), 1);
    assert_eq!(result.function_calls[0].name, "select_files");
    assert_eq!(result.function_calls[0].args, json!({ "files": ["src/lib.rs"] }));
    assert!(result.text.is_none());

    let seen = only_request(&log);
    assert_eq!(seen.path, "/v1beta/models/gemini-test:generateContent");
    assert_eq!(seen.headers["x-goog-api-key"], "test-key");
    assert_eq!(
        seen.body["tools"][0]["functionDeclarations"][0]["name"],
        "select_files"
    );
}

#[tokio::test]
async fn gemini_stream_yields_text_increments() {
    let chunk = |text: &str| json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] });
    let body = sse(&[chunk("Hel"), chunk("lo")]);
    let (base, log) = spawn_mock(StatusCode::OK, "text/event-stream", body).await;
    let client = GeminiClient::new(&quiet(AiConfig {
        gemini: backend(format!("{base}/v1beta"), "gemini-test"),
        ..AiConfig::default()
    }))
    .expect("client");

    let stream = client
        .generate_content_stream("Hi", &GenerateOptions::default())
        .await
        .expect("stream");
    let chunks: Vec<String> = stream.try_collect().await.expect("chunks");

    assert_eq!(chunks.concat(), "Hello");
    let seen = only_request(&log);
    assert_eq!(
        seen.path,
        "/v1beta/models/gemini-test:streamGenerateContent?alt=sse"
    );
    // Web search is offered when no tools are given.
    assert!(seen.body["tools"][0].get("google_search").is_some());
}

#[tokio::test]
async fn gemini_rate_limit_is_typed() {
    let (base, _log) = spawn_mock(StatusCode::TOO_MANY_REQUESTS, "application/json", "{}".to_string()).await;
    let client = GeminiClient::new(&quiet(AiConfig {
        gemini: backend(format!("{base}/v1beta"), "gemini-test"),
        ..AiConfig::default()
    }))
    .expect("client");

    let err = client
        .generate_content("Hi", &GenerateOptions::default())
        .await
        .expect_err("rate limited");
    assert!(matches!(
        err.downcast_ref::<RepoMindError>(),
        Some(RepoMindError::RateLimited { .. })
    ));
}

// ---------------------------------------------------------------------------
// OpenAI and OpenAI-compatible
// ---------------------------------------------------------------------------

#[tokio::test]
async fn openai_string_arguments_become_objects() {
    let response = json!({
        "choices": [{
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": { "name": "select_files", "arguments": "{\"files\":[\"Cargo.toml\"]}" }
                }]
            }
        }]
    });
    let (base, log) = spawn_mock(StatusCode::OK, "application/json", response.to_string()).await;
    let client = OpenAiClient::openai(&quiet(AiConfig {
        openai: backend(format!("{base}/v1"), "gpt-test"),
        ..AiConfig::default()
    }))
    .expect("client");

    let result = client
        .generate_with_functions("Which files?", &[select_files()], &GenerateOptions::default())
        .await
        .expect("function call");

    assert_eq!(result.function_calls.len(), 1);
    assert_eq!(result.function_calls[0].name, "select_files");
    assert_eq!(result.function_calls[0].args, json!({ "files": ["Cargo.toml"] }));
    let seen = only_request(&log);
    assert_eq!(seen.path, "/v1/chat/completions");
    assert_eq!(seen.headers[header::AUTHORIZATION], "Bearer test-key");
    assert_eq!(seen.body["model"], "gpt-test");
    assert_eq!(seen.body["tools"][0]["type"], "function");
}

fn tool_call_response(arguments: &str) -> Value {
    json!({
        "choices": [{
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": { "name": "select_files", "arguments": arguments }
                }]
            }
        }]
    })
}

#[tokio::test]
async fn openai_tool_only_reply_reads_as_empty_text() {
    let response = tool_call_response("{\"files\":[]}");
    let (base, log) = spawn_mock(StatusCode::OK, "application/json", response.to_string()).await;
    let client = OpenAiClient::openai(&quiet(AiConfig {
        openai: backend(format!("{base}/v1"), "gpt-test"),
        ..AiConfig::default()
    }))
    .expect("client");

    let text = client
        .generate_content("Hi", &GenerateOptions::default())
        .await
        .expect("tool-only reply is not an error");

    assert_eq!(text, "");
    assert!(only_request(&log).body.get("tools").is_none());
}

#[tokio::test]
async fn compatible_function_call_is_normalized() {
    let response = tool_call_response("{\"files\":[\"src/main.rs\",\"Cargo.toml\"]}");
    let (base, log) = spawn_mock(StatusCode::OK, "application/json", response.to_string()).await;
    let client = OpenAiClient::compatible(&quiet(AiConfig {
        openai_compatible: BackendConfig {
            api_key: None,
            model: Some("llama-test".to_string()),
            base_url: Some(format!("{base}/v1")),
        },
        ..AiConfig::default()
    }))
    .expect("client");

    let result = client
        .generate_with_functions("Which files?", &[select_files()], &GenerateOptions::default())
        .await
        .expect("function call");

    assert_eq!(result.function_calls.len(), 1);
    assert_eq!(result.function_calls[0].name, "select_files");
    assert_eq!(
        result.function_calls[0].args,
        json!({ "files": ["src/main.rs", "Cargo.toml"] })
    );
    let seen = only_request(&log);
    assert_eq!(seen.path, "/v1/chat/completions");
    assert_eq!(seen.body["model"], "llama-test");
    assert_eq!(seen.body["tools"][0]["function"]["name"], "select_files");
}

#[tokio::test]
async fn compatible_stream_stops_at_done_without_key() {
    let delta = |text: &str| json!({ "choices": [{ "delta": { "content": text } }] });
    let mut body = sse(&[delta("Local "), json!({ "choices": [{ "delta": {} }] }), delta("model")]);
    body.push_str("data: [DONE]\n\n");
    let (base, log) = spawn_mock(StatusCode::OK, "text/event-stream", body).await;

    let client = OpenAiClient::compatible(&quiet(AiConfig {
        openai_compatible: BackendConfig {
            api_key: None,
            model: Some("llama-test".to_string()),
            base_url: Some(format!("{base}/v1")),
        },
        ..AiConfig::default()
    }))
    .expect("client");

    let stream = client
        .generate_content_stream("Hi", &GenerateOptions::default())
        .await
        .expect("stream");
    let chunks: Vec<String> = stream.try_collect().await.expect("chunks");

    assert_eq!(chunks, vec!["Local ".to_string(), "model".to_string()]);
    let seen = only_request(&log);
    assert_eq!(seen.path, "/v1/chat/completions");
    assert!(seen.headers.get(header::AUTHORIZATION).is_none());
    assert_eq!(seen.body["stream"], true);
}

#[tokio::test]
async fn openai_unauthorized_names_the_variable() {
    let (base, _log) = spawn_mock(StatusCode::UNAUTHORIZED, "application/json", "{}".to_string()).await;
    let client = OpenAiClient::openai(&quiet(AiConfig {
        openai: backend(format!("{base}/v1"), "gpt-test"),
        ..AiConfig::default()
    }))
    .expect("client");

    let err = client
        .generate_content("Hi", &GenerateOptions::default())
        .await
        .expect_err("unauthorized");
    assert!(err.to_string().contains("OPENAI_API_KEY"));
}

// ---------------------------------------------------------------------------
// Anthropic
// ---------------------------------------------------------------------------

#[tokio::test]
async fn anthropic_tool_use_blocks_become_calls() {
    let response = json!({
        "content": [
            { "type": "text", "text": "Looking at the layout." },
            { "type": "tool_use", "id": "tu_1", "name": "select_files", "input": { "files": ["README.md"] } }
        ]
    });
    let (base, log) = spawn_mock(StatusCode::OK, "application/json", response.to_string()).await;
    let client = AnthropicClient::new(&quiet(AiConfig {
        anthropic: backend(base, "claude-test"),
        ..AiConfig::default()
    }))
    .expect("client");

    let result = client
        .generate_with_functions("Which files?", &[select_files()], &GenerateOptions::default())
        .await
        .expect("function call");

    assert_eq!(result.function_calls[0].name, "select_files");
    assert_eq!(result.function_calls[0].args, json!({ "files": ["README.md"] }));
    assert_eq!(result.text.as_deref(), Some("Looking at the layout."));

    let seen = only_request(&log);
    assert_eq!(seen.path, "/v1/messages");
    assert_eq!(seen.headers["x-api-key"], "test-key");
    assert_eq!(seen.headers["anthropic-version"], "2023-06-01");
    assert_eq!(seen.body["tools"][0]["input_schema"]["type"], "object");
}

#[tokio::test]
async fn anthropic_stream_reads_text_deltas() {
    let body = sse(&[
        json!({ "type": "message_start", "message": {} }),
        json!({ "type": "content_block_delta", "index": 0, "delta": { "type": "text_delta", "text": "Hi " } }),
        json!({ "type": "content_block_delta", "index": 0, "delta": { "type": "text_delta", "text": "there" } }),
        json!({ "type": "message_stop" }),
    ]);
    let (base, _log) = spawn_mock(StatusCode::OK, "text/event-stream", body).await;
    let client = AnthropicClient::new(&quiet(AiConfig {
        anthropic: backend(base, "claude-test"),
        ..AiConfig::default()
    }))
    .expect("client");

    let stream = client
        .generate_content_stream("Hi", &GenerateOptions::default())
        .await
        .expect("stream");
    let chunks: Vec<String> = stream.try_collect().await.expect("chunks");
    assert_eq!(chunks.concat(), "Hi there");
}

// ---------------------------------------------------------------------------
// Cluster
// ---------------------------------------------------------------------------

fn cluster_config(endpoint: String) -> AiConfig {
    quiet(AiConfig {
        cluster: ClusterAiConfig {
            enabled: true,
            endpoint: Some(endpoint),
            model: "coder-test".to_string(),
            ..ClusterAiConfig::default()
        },
        ..AiConfig::default()
    })
}

#[tokio::test]
async fn cluster_answers_through_chat_completions() {
    let response = json!({ "choices": [{ "message": { "role": "assistant", "content": "From the cluster" } }] });
    let (base, log) = spawn_mock(StatusCode::OK, "application/json", response.to_string()).await;
    let client = ClusterAiClient::new(&cluster_config(format!("{base}/v1"))).expect("client");

    let text = client
        .generate_content("Hi", &GenerateOptions::default())
        .await
        .expect("answer");

    assert_eq!(text, "From the cluster");
    let seen = only_request(&log);
    assert_eq!(seen.path, "/v1/chat/completions");
    assert_eq!(seen.body["model"], "coder-test");
}

#[tokio::test]
async fn cluster_function_call_is_normalized() {
    let response = tool_call_response("{\"files\":[\"README.md\"]}");
    let (base, log) = spawn_mock(StatusCode::OK, "application/json", response.to_string()).await;
    let client = ClusterAiClient::new(&cluster_config(format!("{base}/v1"))).expect("client");

    let result = client
        .generate_with_functions("Which files?", &[select_files()], &GenerateOptions::default())
        .await
        .expect("function call");

    assert_eq!(result.function_calls.len(), 1);
    assert_eq!(result.function_calls[0].name, "select_files");
    assert_eq!(result.function_calls[0].args, json!({ "files": ["README.md"] }));
    let seen = only_request(&log);
    assert_eq!(seen.path, "/v1/chat/completions");
    assert_eq!(seen.body["model"], "coder-test");
    assert_eq!(seen.body["tools"][0]["type"], "function");
}

#[tokio::test]
async fn cluster_single_shot_stops_at_request_deadline() {
    let response = json!({ "choices": [{ "message": { "role": "assistant", "content": "late" } }] });
    let base = spawn_slow_mock(
        "application/json",
        vec![(Duration::from_secs(5), response.to_string())],
    )
    .await;
    let mut config = cluster_config(format!("{base}/v1"));
    config.cluster.request_timeout_seconds = 1;
    let client = ClusterAiClient::new(&config).expect("client");

    let started = Instant::now();
    let err = client
        .generate_content("Hi", &GenerateOptions::default())
        .await
        .expect_err("deadline");

    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(matches!(
        err.downcast_ref::<RepoMindError>(),
        Some(RepoMindError::Timeout { seconds: 1, .. })
    ));
}

#[tokio::test]
async fn cluster_stream_times_out_after_first_chunk() {
    let delta = |text: &str| json!({ "choices": [{ "delta": { "content": text } }] });
    let base = spawn_slow_mock(
        "text/event-stream",
        vec![
            (Duration::ZERO, sse(&[delta("a")])),
            (Duration::from_secs(5), sse(&[delta("b")])),
        ],
    )
    .await;
    let mut config = cluster_config(format!("{base}/v1"));
    config.cluster.stream_timeout_seconds = 1;
    let client = ClusterAiClient::new(&config).expect("client");

    let started = Instant::now();
    let mut stream = client
        .generate_content_stream("Hi", &GenerateOptions::default())
        .await
        .expect("stream");

    let first = stream.next().await.expect("first item").expect("first chunk");
    assert_eq!(first, "a");

    let second = stream.next().await.expect("second item");
    assert!(started.elapsed() < Duration::from_secs(4));
    match second {
        Err(err) => assert!(matches!(
            err.downcast_ref::<RepoMindError>(),
            Some(RepoMindError::Timeout { seconds: 1, .. })
        )),
        Ok(chunk) => panic!("chunk arrived after the deadline: {chunk}"),
    }
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn cluster_missing_model_is_reclassified() {
    let (base, _log) = spawn_mock(
        StatusCode::NOT_FOUND,
        "application/json",
        json!({ "error": "model not loaded" }).to_string(),
    )
    .await;
    let client = ClusterAiClient::new(&cluster_config(base)).expect("client");

    let err = client
        .generate_content("Hi", &GenerateOptions::default())
        .await
        .expect_err("missing model");
    match err.downcast_ref::<RepoMindError>() {
        Some(RepoMindError::ModelNotFound { model, .. }) => assert_eq!(model, "coder-test"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn cluster_health_probe_uses_health_route() {
    let (base, log) = spawn_mock(StatusCode::OK, "application/json", "{}".to_string()).await;
    let client = ClusterAiClient::new(&cluster_config(format!("{base}/v1"))).expect("client");

    assert!(client.health_check().await);
    assert_eq!(only_request(&log).path, "/health");
}

#[tokio::test]
async fn cluster_flag_wins_in_factory() {
    let (base, _log) = spawn_mock(StatusCode::OK, "application/json", "{}".to_string()).await;
    let config = AiConfig {
        provider: Some("gemini".to_string()),
        ..cluster_config(base)
    };

    let provider = create_provider(&config).expect("provider");
    assert_eq!(provider.name(), "cluster-ai");
    assert_eq!(provider.model(), "coder-test");
}
