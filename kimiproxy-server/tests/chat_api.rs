use std::collections::VecDeque;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::{Value, json};
use shared::config::server::Config;

use server::app_state::AppState;
use server::server::{create_app_router, metrics_handle};
use server::services::transport::{TransportError, UpstreamBody, UpstreamTransport};

/// Transport fed from scripted response queues, recording every call so
/// tests can assert on the exact upstream traffic.
struct ScriptedTransport {
    gets: Mutex<VecDeque<Result<UpstreamBody, TransportError>>>,
    posts: Mutex<VecDeque<Result<UpstreamBody, TransportError>>>,
    get_count: AtomicUsize,
    post_count: AtomicUsize,
    post_fields: Mutex<Vec<Vec<(String, String)>>>,
}

impl ScriptedTransport {
    fn new(
        gets: Vec<Result<UpstreamBody, TransportError>>,
        posts: Vec<Result<UpstreamBody, TransportError>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            gets: Mutex::new(gets.into()),
            posts: Mutex::new(posts.into()),
            get_count: AtomicUsize::new(0),
            post_count: AtomicUsize::new(0),
            post_fields: Mutex::new(Vec::new()),
        })
    }

    fn field(&self, post_index: usize, name: &str) -> Option<String> {
        let posts = self.post_fields.lock().unwrap();
        posts.get(post_index).and_then(|fields| {
            fields
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.clone())
        })
    }
}

#[async_trait]
impl UpstreamTransport for ScriptedTransport {
    async fn get_text(&self, _url: &str) -> Result<UpstreamBody, TransportError> {
        self.get_count.fetch_add(1, Ordering::SeqCst);
        self.gets
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError("script exhausted".to_string())))
    }

    async fn post_form(
        &self,
        _url: &str,
        fields: &[(&str, &str)],
    ) -> Result<UpstreamBody, TransportError> {
        self.post_count.fetch_add(1, Ordering::SeqCst);
        self.post_fields.lock().unwrap().push(
            fields
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        );
        self.posts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError("script exhausted".to_string())))
    }
}

fn chat_page(nonce: &str) -> Result<UpstreamBody, TransportError> {
    Ok(UpstreamBody {
        status: http::StatusCode::OK,
        body: format!(
            "<html><script>var kimi_ajax = {};</script></html>",
            json!({ "ajax_url": "/wp-admin/admin-ajax.php", "nonce": nonce })
        ),
    })
}

fn reply(message: &str) -> Result<UpstreamBody, TransportError> {
    Ok(UpstreamBody {
        status: http::StatusCode::OK,
        body: json!({ "success": true, "data": { "message": message } }).to_string(),
    })
}

fn rejection(detail: &str) -> Result<UpstreamBody, TransportError> {
    Ok(UpstreamBody {
        status: http::StatusCode::OK,
        body: json!({ "success": false, "data": detail }).to_string(),
    })
}

fn test_app(transport: Arc<ScriptedTransport>) -> TestServer {
    let mut config = Config::with_defaults();
    // Instant emission keeps the tests fast; pacing is covered by config.
    config.stream.char_delay_ms = 0;

    let state = Arc::new(AppState::with_transport(Arc::new(config), transport));
    let app = create_app_router(state, metrics_handle());
    TestServer::new(app).expect("test server")
}

/// `data:` payloads of an SSE body, in order.
fn sse_payloads(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(str::to_string)
        .collect()
}

fn chunk_content(chunk: &Value) -> Option<String> {
    chunk["choices"][0]["delta"]["content"]
        .as_str()
        .map(str::to_string)
}

#[tokio::test]
async fn completion_streams_one_chunk_per_character_then_done() {
    let transport = ScriptedTransport::new(vec![chat_page("n1")], vec![reply("你好!")]);
    let server = test_app(Arc::clone(&transport));

    let response = server
        .post("/v1/chat/completions")
        .json(&json!({
            "messages": [{ "role": "user", "content": "打个招呼" }]
        }))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);

    let payloads = sse_payloads(&response.text());
    assert_eq!(payloads.last().map(String::as_str), Some("[DONE]"));

    let chunks: Vec<Value> = payloads[..payloads.len() - 1]
        .iter()
        .map(|payload| serde_json::from_str(payload).unwrap())
        .collect();

    // One chunk per character, then a bare finish chunk.
    assert_eq!(chunks.len(), 4);
    for chunk in &chunks {
        assert_eq!(chunk["object"], "chat.completion.chunk");
        assert!(chunk["id"].as_str().unwrap().starts_with("chatcmpl-"));
        assert_eq!(chunk["model"], "kimi-k2-instruct-0905");
    }

    let reassembled: String = chunks[..3]
        .iter()
        .filter_map(chunk_content)
        .collect();
    assert_eq!(reassembled, "你好!");
    for chunk in &chunks[..3] {
        assert_eq!(chunk_content(chunk).unwrap().chars().count(), 1);
        assert!(chunk["choices"][0]["finish_reason"].is_null());
    }

    let finish = &chunks[3];
    assert_eq!(finish["choices"][0]["finish_reason"], "stop");
    assert!(finish["choices"][0]["delta"]["content"].is_null());

    assert_eq!(transport.get_count.load(Ordering::SeqCst), 1);
    assert_eq!(transport.post_count.load(Ordering::SeqCst), 1);
    assert_eq!(
        transport.field(0, "action").as_deref(),
        Some("kimi_send_message")
    );
    assert_eq!(transport.field(0, "nonce").as_deref(), Some("n1"));
    assert_eq!(
        transport.field(0, "model").as_deref(),
        Some("moonshotai/Kimi-K2-Instruct-0905")
    );
    assert_eq!(
        transport.field(0, "message").as_deref(),
        Some("用户: 打个招呼")
    );
    assert!(
        transport
            .field(0, "session_id")
            .unwrap()
            .starts_with("session_")
    );
}

#[tokio::test]
async fn anonymous_request_receives_a_session_cookie() {
    let transport = ScriptedTransport::new(vec![chat_page("n1")], vec![reply("hi")]);
    let server = test_app(transport);

    let response = server
        .post("/v1/chat/completions")
        .json(&json!({
            "messages": [{ "role": "user", "content": "hello" }]
        }))
        .await;

    let cookie = response.header("set-cookie");
    let cookie = cookie.to_str().unwrap();
    assert!(cookie.starts_with("sid="));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Lax"));
    assert!(cookie.contains("Max-Age=3600"));
}

#[tokio::test]
async fn pinned_session_carries_history_into_the_next_prompt() {
    let transport = ScriptedTransport::new(
        vec![chat_page("n1")],
        vec![reply("你好！"), reply("再见！")],
    );
    let server = test_app(Arc::clone(&transport));

    let first = server
        .post("/v1/chat/completions")
        .add_header("x-session-id", "alice")
        .json(&json!({
            "messages": [{ "role": "user", "content": "你好" }]
        }))
        .await;
    assert_eq!(first.status_code(), StatusCode::OK);
    // Pinned keys never trigger Set-Cookie.
    assert!(first.maybe_header("set-cookie").is_none());

    let second = server
        .post("/v1/chat/completions")
        .add_header("x-session-id", "alice")
        .json(&json!({
            "messages": [{ "role": "user", "content": "再见" }]
        }))
        .await;
    assert_eq!(second.status_code(), StatusCode::OK);

    // Second prompt replays the recorded turns with the transcript labels.
    assert_eq!(
        transport.field(1, "message").as_deref(),
        Some("用户: 你好\n模型: 你好！\n用户: 再见")
    );
    // One upstream conversation across both requests, one cached nonce.
    assert_eq!(
        transport.field(0, "session_id"),
        transport.field(1, "session_id")
    );
    assert_eq!(transport.get_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rejected_nonce_is_refreshed_once_and_the_call_retried() {
    let transport = ScriptedTransport::new(
        vec![chat_page("stale"), chat_page("fresh")],
        vec![rejection("无效的 nonce"), reply("ok")],
    );
    let server = test_app(Arc::clone(&transport));

    let response = server
        .post("/v1/chat/completions")
        .add_header("x-session-id", "alice")
        .json(&json!({
            "messages": [{ "role": "user", "content": "hi" }]
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let payloads = sse_payloads(&response.text());
    let reassembled: String = payloads[..payloads.len() - 1]
        .iter()
        .map(|payload| serde_json::from_str::<Value>(payload).unwrap())
        .filter_map(|chunk| chunk_content(&chunk))
        .collect();
    assert_eq!(reassembled, "ok");

    // The retry fetched a fresh nonce and used it.
    assert_eq!(transport.get_count.load(Ordering::SeqCst), 2);
    assert_eq!(transport.post_count.load(Ordering::SeqCst), 2);
    assert_eq!(transport.field(0, "nonce").as_deref(), Some("stale"));
    assert_eq!(transport.field(1, "nonce").as_deref(), Some("fresh"));

    // The successful reply was recorded as a turn.
    let info = server
        .get("/v1/session")
        .add_header("x-session-id", "alice")
        .await;
    let info: Value = info.json();
    assert_eq!(info["turn_count"], 2);
}

#[tokio::test]
async fn double_failure_streams_the_failure_notice_and_leaves_history_alone() {
    let transport = ScriptedTransport::new(
        vec![chat_page("n1"), chat_page("n2")],
        vec![rejection("nope"), rejection("still nope")],
    );
    let server = test_app(Arc::clone(&transport));

    let response = server
        .post("/v1/chat/completions")
        .add_header("x-session-id", "alice")
        .json(&json!({
            "messages": [{ "role": "user", "content": "hi" }]
        }))
        .await;

    // Failures after the stream starts surface inside the stream, not as
    // an HTTP error.
    assert_eq!(response.status_code(), StatusCode::OK);

    let payloads = sse_payloads(&response.text());
    assert_eq!(payloads.len(), 2);
    assert_eq!(payloads[1], "[DONE]");

    let chunk: Value = serde_json::from_str(&payloads[0]).unwrap();
    assert_eq!(
        chunk_content(&chunk).as_deref(),
        Some("重试后上游请求依然失败")
    );
    assert_eq!(chunk["choices"][0]["finish_reason"], "stop");

    assert_eq!(transport.post_count.load(Ordering::SeqCst), 2);

    // Nothing was recorded for the failed exchange.
    let info = server
        .get("/v1/session")
        .add_header("x-session-id", "alice")
        .await;
    let info: Value = info.json();
    assert_eq!(info["turn_count"], 0);
}

#[tokio::test]
async fn empty_message_list_is_a_problem_response() {
    let transport = ScriptedTransport::new(vec![], vec![]);
    let server = test_app(Arc::clone(&transport));

    let response = server
        .post("/v1/chat/completions")
        .json(&json!({ "messages": [] }))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.header("content-type"),
        "application/problem+json"
    );
    let body: Value = serde_json::from_str(&response.text()).unwrap();
    assert_eq!(body["code"], "validation_failed");
    assert_eq!(transport.get_count.load(Ordering::SeqCst), 0);
    assert_eq!(transport.post_count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_model_is_rejected_without_upstream_traffic() {
    let transport = ScriptedTransport::new(vec![], vec![]);
    let server = test_app(Arc::clone(&transport));

    let response = server
        .post("/v1/chat/completions")
        .json(&json!({
            "model": "gpt-4o",
            "messages": [{ "role": "user", "content": "hi" }]
        }))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_str(&response.text()).unwrap();
    assert_eq!(body["code"], "unsupported_model");
    assert_eq!(transport.get_count.load(Ordering::SeqCst), 0);
    assert_eq!(transport.post_count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn models_endpoint_lists_the_configured_catalog() {
    let transport = ScriptedTransport::new(vec![], vec![]);
    let server = test_app(transport);

    let response = server.get("/v1/models").await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let body: Value = response.json();
    assert_eq!(body["object"], "list");
    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|model| model["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["kimi-k2-instruct-0905", "kimi-k2-instruct"]);
    assert_eq!(body["data"][0]["object"], "model");
    assert_eq!(body["data"][0]["owned_by"], "kimi-ai");
}

#[tokio::test]
async fn session_reset_clears_the_conversation() {
    let transport = ScriptedTransport::new(
        vec![chat_page("n1")],
        vec![reply("hello"), reply("fresh start")],
    );
    let server = test_app(Arc::clone(&transport));

    let completion = server
        .post("/v1/chat/completions")
        .add_header("x-session-id", "alice")
        .json(&json!({
            "messages": [{ "role": "user", "content": "hi" }]
        }))
        .await;
    assert_eq!(completion.status_code(), StatusCode::OK);

    let reset = server
        .post("/v1/session/reset")
        .add_header("x-session-id", "alice")
        .await;
    let reset: Value = reset.json();
    assert_eq!(reset["ok"], true);
    assert_eq!(reset["cleared"], true);

    // The session is gone, so info reports only the resolved key.
    let info = server
        .get("/v1/session")
        .add_header("x-session-id", "alice")
        .await;
    let info: Value = info.json();
    assert_eq!(info["session_key"], "alice");
    assert!(info.get("turn_count").is_none());
    assert!(info.get("upstream_session_id").is_none());

    // Resetting again is a no-op.
    let again = server
        .post("/v1/session/reset")
        .add_header("x-session-id", "alice")
        .await;
    let again: Value = again.json();
    assert_eq!(again["cleared"], false);

    // The next completion opens a fresh upstream conversation.
    let next = server
        .post("/v1/chat/completions")
        .add_header("x-session-id", "alice")
        .json(&json!({
            "messages": [{ "role": "user", "content": "hello again" }]
        }))
        .await;
    assert_eq!(next.status_code(), StatusCode::OK);
    assert_eq!(
        transport.field(1, "message").as_deref(),
        Some("用户: hello again")
    );
    assert_ne!(
        transport.field(0, "session_id"),
        transport.field(1, "session_id")
    );
}

#[tokio::test]
async fn reset_body_can_name_the_session() {
    let transport = ScriptedTransport::new(vec![chat_page("n1")], vec![reply("hello")]);
    let server = test_app(transport);

    let completion = server
        .post("/v1/chat/completions")
        .json(&json!({
            "session_id": "bob",
            "messages": [{ "role": "user", "content": "hi" }]
        }))
        .await;
    assert_eq!(completion.status_code(), StatusCode::OK);
    // Explicit body keys never trigger Set-Cookie.
    assert!(completion.maybe_header("set-cookie").is_none());

    let reset = server
        .post("/v1/session/reset")
        .json(&json!({ "session_id": "bob" }))
        .await;
    let reset: Value = reset.json();
    assert_eq!(reset["cleared"], true);
}

#[tokio::test]
async fn healthz_reports_ok() {
    let transport = ScriptedTransport::new(vec![], vec![]);
    let server = test_app(transport);

    let response = server.get("/healthz").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
}
