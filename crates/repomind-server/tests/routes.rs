// SPDX-License-Identifier: Apache-2.0

//! End-to-end tests for the HTTP routes using in-process providers.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use axum::routing::get;
use axum::{Json, Router};
use repomind_core::github::create_client;
use repomind_core::{
    AiProvider, AppConfig, AppState, FunctionCallResult, FunctionDeclaration, GenerateOptions,
    GitHubConfig, MemoryCache, TextStream,
};
use repomind_server::{REQUEST_ID_HEADER, VISITOR_ID_HEADER, router};
use serde_json::{Value, json};
use tower::ServiceExt;

/// Answers every prompt with a fixed two-chunk stream.
#[derive(Default)]
struct StubAi {
    prompts: AtomicUsize,
}

#[async_trait]
impl AiProvider for StubAi {
    fn name(&self) -> &str {
        "stub"
    }

    fn model(&self) -> &str {
        "stub-1"
    }

    async fn generate_content(&self, _prompt: &str, _options: &GenerateOptions) -> Result<String> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        Ok("Hello there".to_string())
    }

    async fn generate_content_stream(
        &self,
        prompt: &str,
        _options: &GenerateOptions,
    ) -> Result<TextStream> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        assert!(prompt.contains("octocat"), "prompt carries the profile");
        let chunks = vec![Ok("Hello ".to_string()), Ok("there".to_string())];
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn generate_with_functions(
        &self,
        _prompt: &str,
        _functions: &[FunctionDeclaration],
        _options: &GenerateOptions,
    ) -> Result<FunctionCallResult> {
        Ok(FunctionCallResult::default())
    }
}

fn state_with(ai: Arc<StubAi>) -> Arc<AppState> {
    let state = AppState::new(AppConfig::default());
    state.set_cache(Arc::new(MemoryCache::new()));
    state.set_ai(ai);
    Arc::new(state)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

/// Serves a single user profile and repository list.
async fn spawn_github_mock() -> String {
    let app = Router::new()
        .route(
            "/users/octocat",
            get(|| async {
                Json(json!({
                    "login": "octocat",
                    "name": "The Octocat",
                    "bio": "Mascot",
                    "avatar_url": "https://avatars.example/octocat",
                    "html_url": "https://github.com/octocat",
                    "public_repos": 2,
                    "followers": 10,
                    "following": 0
                }))
            }),
        )
        .route(
            "/users/octocat/repos",
            get(|| async {
                Json(json!([
                    {
                        "name": "hello-world",
                        "full_name": "octocat/hello-world",
                        "description": "My first repository",
                        "language": "Rust",
                        "stargazers_count": 5,
                        "forks_count": 1,
                        "fork": false,
                        "html_url": "https://github.com/octocat/hello-world",
                        "updated_at": "2026-01-01T00:00:00Z"
                    }
                ]))
            }),
        )
        .fallback(|| async {
            (
                StatusCode::NOT_FOUND,
                Json(json!({
                    "message": "Not Found",
                    "documentation_url": "https://docs.github.com/rest"
                })),
            )
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

#[tokio::test]
async fn health_reports_providers() {
    let app = router(state_with(Arc::new(StubAi::default())));

    let response = app
        .oneshot(Request::get("/api/health").body(Body::empty()).expect("request"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["cache"]["provider"], "memory");
    assert_eq!(body["ai"]["provider"], "stub");
    assert_eq!(body["ai"]["model"], "stub-1");
}

#[tokio::test]
async fn track_then_stats_and_badge() {
    let state = state_with(Arc::new(StubAi::default()));

    for event in ["visit", "query", "query"] {
        let response = router(state.clone())
            .oneshot(
                Request::post(format!("/api/track?event={event}"))
                    .header(VISITOR_ID_HEADER, "visitor-1")
                    .header("cf-ipcountry", "NL")
                    .header(header::USER_AGENT, "Mozilla/5.0 (X11; Linux x86_64)")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    let stats = router(state.clone())
        .oneshot(Request::get("/api/stats").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(stats.status(), StatusCode::OK);
    let stats = body_json(stats).await;
    assert_eq!(stats["totalVisitors"], 1);
    assert_eq!(stats["totalQueries"], 2);
    assert_eq!(stats["countryStats"]["NL"], 1);

    let badge = router(state.clone())
        .oneshot(Request::get("/api/badge").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert!(badge.headers().contains_key(header::CACHE_CONTROL));
    let badge = body_json(badge).await;
    assert_eq!(badge["schemaVersion"], 1);
    assert_eq!(badge["message"], "2");

    let card = router(state)
        .oneshot(Request::get("/api/stats/card").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(
        card.headers()[header::CONTENT_TYPE].to_str().expect("header"),
        "image/svg+xml"
    );
    let svg = body_text(card).await;
    assert!(svg.contains(">NL<"));
}

#[tokio::test]
async fn track_rejects_unknown_event() {
    let app = router(state_with(Arc::new(StubAi::default())));

    let response = app
        .oneshot(
            Request::post("/api/track?event=purchase")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().expect("message").contains("purchase"));
}

#[tokio::test]
async fn chat_rejects_malformed_subject() {
    let app = router(state_with(Arc::new(StubAi::default())));

    let response = app
        .oneshot(
            Request::post("/api/chat")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "subject": "a/b/c", "question": "What is this?" }).to_string(),
                ))
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn chat_rejects_blank_question() {
    let app = router(state_with(Arc::new(StubAi::default())));

    let response = app
        .oneshot(
            Request::post("/api/chat")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "subject": "octocat", "question": "   " }).to_string(),
                ))
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn chat_streams_profile_answer_and_counts_query() {
    let base = spawn_github_mock().await;
    let ai = Arc::new(StubAi::default());
    let state = state_with(ai.clone());
    let github = create_client(&GitHubConfig {
        api_base_url: Some(base),
        ..GitHubConfig::default()
    })
    .expect("github client");
    state.set_github(Arc::new(github));

    let response = router(state.clone())
        .oneshot(
            Request::post("/api/chat")
                .header(header::CONTENT_TYPE, "application/json")
                .header(VISITOR_ID_HEADER, "visitor-chat")
                .body(Body::from(
                    json!({ "subject": "octocat", "question": "What do they build?" }).to_string(),
                ))
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    assert!(
        response.headers()[header::CONTENT_TYPE]
            .to_str()
            .expect("header")
            .starts_with("text/plain")
    );
    assert_eq!(body_text(response).await, "Hello there");
    assert_eq!(ai.prompts.load(Ordering::SeqCst), 1);

    let stats = router(state)
        .oneshot(Request::get("/api/stats").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(body_json(stats).await["totalQueries"], 1);
}

#[tokio::test]
async fn chat_with_unknown_user_maps_to_404() {
    let base = spawn_github_mock().await;
    let state = state_with(Arc::new(StubAi::default()));
    let github = create_client(&GitHubConfig {
        api_base_url: Some(base),
        ..GitHubConfig::default()
    })
    .expect("github client");
    state.set_github(Arc::new(github));

    let response = router(state)
        .oneshot(
            Request::post("/api/chat")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "subject": "ghost", "question": "Who?" }).to_string(),
                ))
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert!(body["error"].as_str().expect("message").contains("ghost"));
}
