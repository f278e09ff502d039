//! Shared test infrastructure: mock downstream services and a ward spawner.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpListener;

/// A prompt whose codepoint entropy is exactly 6 bits (64 distinct symbols,
/// each once): SUSPICIOUS under the default thresholds.
pub const SUSPICIOUS_PROMPT: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789?!";

/// Same symbol multiset as [`SUSPICIOUS_PROMPT`] (same entropy), but
/// containing the digit run the mock judge rejects.
pub const JUDGE_REJECT_PROMPT: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ9876543210?!";

/// Deterministic noise drawn from 256 distinct codepoints; entropy ~8 bits,
/// WEIRD under the default thresholds.
pub fn weird_noise(len: usize) -> String {
    (0..len)
        .map(|i| char::from_u32(0x3041 + ((i * 7919) % 256) as u32).expect("valid codepoint"))
        .collect()
}

/// Token-stuffing payload: low-entropy noise padding around a tiny task.
pub fn stuffed_prompt() -> String {
    let mut s = String::from("REPEATED_NOISE ");
    for n in 0..500 {
        s.push_str(&format!("noise-{n} "));
    }
    s.push_str(" What is 2+2?");
    s
}

// ============================================================================
// Call capture
// ============================================================================

/// Records the requests a mock service received.
#[derive(Clone, Default)]
pub struct Capture {
    calls: Arc<AtomicUsize>,
    bodies: Arc<Mutex<Vec<Value>>>,
}

impl Capture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, body: Value) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.bodies.lock().unwrap().push(body);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_body(&self) -> Option<Value> {
        self.bodies.lock().unwrap().last().cloned()
    }
}

// ============================================================================
// Mock downstream services
// ============================================================================

/// Serve a router on an ephemeral port; returns its base URL.
pub async fn spawn_mock(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock");
    let addr = listener.local_addr().expect("mock addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    format!("http://{addr}")
}

/// Mock sieve: prompts of 20 or more words compress down to the final
/// question with an estimate of `words - 3`; shorter prompts report no
/// savings.
pub fn mock_sieve(capture: Capture) -> Router {
    async fn handle(State(capture): State<Capture>, Json(body): Json<Value>) -> impl IntoResponse {
        capture.record(body.clone());
        let text = body["text"].as_str().unwrap_or("");
        let words = text.split_whitespace().count() as i64;
        let response = if words >= 20 {
            json!({
                "compressed_text": "What is 2+2?",
                "tokens_saved_estimate": words - 3,
            })
        } else {
            json!({
                "compressed_text": text,
                "tokens_saved_estimate": 0,
            })
        };
        Json(response)
    }
    Router::new().route("/", post(handle)).with_state(capture)
}

/// Mock judge: answers "invalid" when the prompt contains the digit run
/// from [`JUDGE_REJECT_PROMPT`], otherwise "valid".
pub fn mock_judge(capture: Capture) -> Router {
    async fn handle(State(capture): State<Capture>, Json(body): Json<Value>) -> impl IntoResponse {
        capture.record(body.clone());
        let prompt = body["messages"]
            .as_array()
            .and_then(|m| m.last())
            .and_then(|m| m["content"].as_str())
            .unwrap_or("");
        let verdict = if prompt.contains("9876543210") {
            "invalid"
        } else {
            "valid"
        };
        Json(json!({
            "id": "chatcmpl-judge",
            "choices": [{
                "message": {"role": "assistant", "content": verdict},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 40, "completion_tokens": 1, "total_tokens": 41}
        }))
    }
    Router::new().route("/", post(handle)).with_state(capture)
}

/// Mock upstream: returns a fixed completion and counts calls.
pub fn mock_upstream(capture: Capture) -> Router {
    async fn handle(State(capture): State<Capture>, Json(body): Json<Value>) -> impl IntoResponse {
        capture.record(body.clone());
        Json(json!({
            "id": "chatcmpl-upstream",
            "choices": [{
                "message": {"role": "assistant", "content": "The answer is 4."},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 7, "completion_tokens": 5, "total_tokens": 12}
        }))
    }
    Router::new().route("/", post(handle)).with_state(capture)
}

/// Mock upstream that always fails with the given status and body.
pub fn mock_upstream_error(status: u16, body: &'static str) -> Router {
    let handler = move || async move {
        (
            StatusCode::from_u16(status).expect("valid status"),
            [("content-type", "application/json")],
            body,
        )
    };
    Router::new().route("/", post(handler))
}

/// A base URL nothing listens on, for outage tests.
pub fn dead_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    format!("http://{addr}")
}

// ============================================================================
// Ward spawning
// ============================================================================

pub struct WardConfig {
    pub sieve_url: String,
    pub judge_url: Option<String>,
    pub judge_enabled: bool,
    pub upstream_url: String,
    pub penalty_half_life_seconds: u64,
}

impl WardConfig {
    pub fn new(sieve_url: String, judge_url: String, upstream_url: String) -> Self {
        Self {
            sieve_url,
            judge_url: Some(judge_url),
            judge_enabled: true,
            upstream_url,
            penalty_half_life_seconds: 600,
        }
    }
}

pub struct Ward {
    pub base_url: String,
    _server: tokio::task::JoinHandle<()>,
}

impl Ward {
    pub fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }
}

/// Spawn the ward binary with a generated config and wait for readiness.
pub async fn spawn_ward(config: WardConfig, temp_dir: &TempDir) -> Ward {
    let port = free_port();
    let config_path = temp_dir.path().join("ward.toml");

    let mut toml = format!(
        r#"[server]
listen = "127.0.0.1:{port}"

[timeouts]
sieve_s = 2
judge_s = 2
upstream_s = 5

[penalty]
half_life_seconds = {half_life}

[sieve]
url = "{sieve}"

[upstream]
url = "{upstream}"

[judge]
enabled = {judge_enabled}
"#,
        half_life = config.penalty_half_life_seconds,
        sieve = config.sieve_url,
        upstream = config.upstream_url,
        judge_enabled = config.judge_enabled,
    );
    if let Some(judge_url) = &config.judge_url {
        toml.push_str(&format!("url = \"{judge_url}\"\n"));
    }
    std::fs::write(&config_path, &toml).expect("write config");

    let server = tokio::spawn(async move {
        let status = tokio::process::Command::new(env!("CARGO_BIN_EXE_ward"))
            .arg("-c")
            .arg(&config_path)
            .kill_on_drop(true)
            .status()
            .await;
        let _ = status;
    });

    let base_url = format!("http://127.0.0.1:{port}");
    let client = reqwest::Client::new();
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if let Ok(resp) = client.get(&base_url).send().await {
            if resp.status().is_success() {
                return Ward {
                    base_url,
                    _server: server,
                };
            }
        }
    }
    panic!("ward did not become ready");
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("addr").port()
}
