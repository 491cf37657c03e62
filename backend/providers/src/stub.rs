//! Local HTTP stand-in for provider endpoints, used by adapter tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::Router;
use tokio::net::TcpListener;

/// One request as the stub saw it.
#[derive(Debug, Clone)]
pub(crate) struct Recorded {
    pub path: String,
    pub headers: HeaderMap,
    pub body: String,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Answers every request with the next scripted reply; the last reply repeats.
#[derive(Clone)]
pub(crate) struct StubServer {
    pub url: String,
    replies: Arc<Vec<(u16, String)>>,
    calls: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<Recorded>>>,
}

impl StubServer {
    pub async fn start(replies: Vec<(u16, String)>) -> Self {
        assert!(!replies.is_empty(), "stub needs at least one reply");
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let stub = Self {
            url: format!("http://{}", listener.local_addr().unwrap()),
            replies: Arc::new(replies),
            calls: Arc::new(AtomicUsize::new(0)),
            seen: Arc::new(Mutex::new(Vec::new())),
        };
        let app = Router::new().fallback(answer).with_state(stub.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        stub
    }

    pub fn hits(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.seen.lock().unwrap().clone()
    }
}

async fn answer(State(stub): State<StubServer>, uri: Uri, headers: HeaderMap, body: String) -> (StatusCode, String) {
    stub.seen.lock().unwrap().push(Recorded {
        path: uri.path().to_string(),
        headers,
        body,
    });
    let n = stub.calls.fetch_add(1, Ordering::SeqCst);
    let (code, text) = &stub.replies[n.min(stub.replies.len() - 1)];
    (StatusCode::from_u16(*code).unwrap(), text.clone())
}

/// Gemini `generateContent` envelope carrying `text`.
pub(crate) fn gemini_envelope(text: &str) -> String {
    serde_json::json!({
        "candidates": [{ "content": { "role": "model", "parts": [{ "text": text }] } }]
    })
    .to_string()
}

/// Chat-completions envelope carrying `text`.
pub(crate) fn chat_envelope(text: &str) -> String {
    serde_json::json!({
        "choices": [{ "index": 0, "message": { "role": "assistant", "content": text } }]
    })
    .to_string()
}

/// YandexGPT completion envelope carrying `text`.
pub(crate) fn yandex_envelope(text: &str) -> String {
    serde_json::json!({
        "result": { "alternatives": [{ "message": { "role": "assistant", "text": text }, "status": "ALTERNATIVE_STATUS_FINAL" }] }
    })
    .to_string()
}
