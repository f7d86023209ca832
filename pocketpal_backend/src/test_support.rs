//! Test doubles: an in-process HTTP stub that never touches the network,
//! and a scripted completion backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use futures_util::{stream, StreamExt};
use tokio::task::JoinHandle;

use crate::config::CompletionSettings;
use crate::llm_client::{ChatMessage, CompletionBackend, CompletionError, DeltaStream};

pub(crate) type Script = Result<Vec<Result<String, CompletionError>>, CompletionError>;

/// Plays back one scripted stream, then empty ones; records every request.
pub(crate) struct ScriptedBackend {
    script: Mutex<Option<Script>>,
    step: Option<Duration>,
    pub(crate) calls: AtomicUsize,
    pub(crate) requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedBackend {
    pub(crate) fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(Some(script)),
            step: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn replying(deltas: &[&str]) -> Arc<Self> {
        Self::new(Ok(deltas.iter().map(|d| Ok(d.to_string())).collect()))
    }

    /// Like `replying`, but each delta arrives `step` after the previous one.
    pub(crate) fn paced(deltas: &[&str], step: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(Some(Ok(deltas.iter().map(|d| Ok(d.to_string())).collect()))),
            step: Some(step),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn stream_chat(
        &self,
        _settings: &CompletionSettings,
        messages: Vec<ChatMessage>,
    ) -> Result<DeltaStream, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(messages);
        let script = self.script.lock().unwrap().take().unwrap_or(Ok(Vec::new()));
        let deltas = stream::iter(script?);
        match self.step {
            Some(step) => Ok(Box::pin(deltas.then(move |delta| async move {
                tokio::time::sleep(step).await;
                delta
            }))),
            None => Ok(Box::pin(deltas)),
        }
    }
}

pub(crate) fn sse_event(content: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({"choices": [{"index": 0, "delta": {"content": content}}]})
    )
}

/// One request as the stub saw it.
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) query: Option<String>,
    pub(crate) headers: HeaderMap,
    pub(crate) body: String,
}

impl RecordedRequest {
    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

#[derive(Clone)]
struct StubResponse {
    status: StatusCode,
    content_type: String,
    body: String,
}

#[derive(Clone)]
struct StubState {
    routes: Arc<HashMap<String, StubResponse>>,
    fallback: Option<StubResponse>,
    requests: flume::Sender<RecordedRequest>,
}

/// Loopback axum server with canned responses.
pub(crate) struct HttpStub {
    base_url: String,
    requests: flume::Receiver<RecordedRequest>,
    task: JoinHandle<()>,
}

impl HttpStub {
    /// Answer every request, whatever its path, with the same response.
    pub(crate) async fn serve(status: StatusCode, content_type: &str, body: impl Into<String>) -> Self {
        let response = StubResponse {
            status,
            content_type: content_type.to_string(),
            body: body.into(),
        };
        Self::start(HashMap::new(), Some(response)).await
    }

    /// Answer by exact path (query excluded); unknown paths get a 404.
    pub(crate) async fn with_routes(routes: Vec<(&str, StatusCode, &str, String)>) -> Self {
        let routes = routes
            .into_iter()
            .map(|(path, status, content_type, body)| {
                let response = StubResponse {
                    status,
                    content_type: content_type.to_string(),
                    body,
                };
                (path.to_string(), response)
            })
            .collect();
        Self::start(routes, None).await
    }

    async fn start(routes: HashMap<String, StubResponse>, fallback: Option<StubResponse>) -> Self {
        let (tx, rx) = flume::unbounded();
        let state = StubState {
            routes: Arc::new(routes),
            fallback,
            requests: tx,
        };
        let app = Router::new().fallback(respond).with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub");
        let addr = listener.local_addr().expect("stub addr");
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::warn!("stub server stopped: {}", e);
            }
        });

        Self {
            base_url: format!("http://{}", addr),
            requests: rx,
            task,
        }
    }

    pub(crate) fn base_url(&self) -> String {
        self.base_url.clone()
    }

    pub(crate) async fn request(&self) -> RecordedRequest {
        self.requests.recv_async().await.expect("stub request")
    }

    pub(crate) fn received(&self) -> Vec<RecordedRequest> {
        self.requests.drain().collect()
    }
}

impl Drop for HttpStub {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn respond(
    State(state): State<StubState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let route = state
        .routes
        .get(uri.path())
        .or(state.fallback.as_ref())
        .cloned();

    let _ = state.requests.send(RecordedRequest {
        method,
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    });

    match route {
        Some(route) => (
            route.status,
            [(header::CONTENT_TYPE, route.content_type)],
            route.body,
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
