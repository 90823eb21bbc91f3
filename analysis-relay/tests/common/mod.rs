use analysis_relay::config::RelayConfig;
use analysis_relay::startup::Application;
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use reqwest::multipart;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

/// What the fake analysis server does with each upload.
#[derive(Clone, Copy)]
pub enum UpstreamBehavior {
    /// 200 with body `XLSX:{filename}:{bytes}`.
    Echo,
    /// Answer with the given status and text body.
    Fail(u16, &'static str),
    /// Wait before echoing.
    Slow(Duration),
}

#[derive(Debug, Clone)]
pub struct ReceivedUpload {
    pub field_name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Clone)]
struct MockState {
    behavior: UpstreamBehavior,
    calls: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<ReceivedUpload>>>,
}

pub struct MockUpstream {
    pub base_url: String,
    calls: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<ReceivedUpload>>>,
}

impl MockUpstream {
    pub async fn spawn(behavior: UpstreamBehavior) -> Self {
        let state = MockState {
            behavior,
            calls: Arc::new(AtomicUsize::new(0)),
            received: Arc::new(Mutex::new(Vec::new())),
        };

        let app = Router::new()
            .route("/analyze", post(mock_analyze))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock upstream");
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        MockUpstream {
            base_url: format!("http://127.0.0.1:{}", port),
            calls: state.calls,
            received: state.received,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<ReceivedUpload> {
        self.received.lock().unwrap().clone()
    }
}

async fn mock_analyze(State(state): State<MockState>, mut multipart: Multipart) -> Response {
    state.calls.fetch_add(1, Ordering::SeqCst);

    let mut echoed = Vec::new();
    while let Some(field) = multipart.next_field().await.unwrap() {
        let upload = ReceivedUpload {
            field_name: field.name().unwrap_or_default().to_string(),
            filename: field.file_name().map(str::to_string),
            content_type: field.content_type().map(str::to_string),
            bytes: field.bytes().await.unwrap().to_vec(),
        };

        echoed = format!("XLSX:{}:", upload.filename.clone().unwrap_or_default()).into_bytes();
        echoed.extend_from_slice(&upload.bytes);
        state.received.lock().unwrap().push(upload);
    }

    match state.behavior {
        UpstreamBehavior::Echo => (StatusCode::OK, echoed).into_response(),
        UpstreamBehavior::Fail(status, body) => {
            (StatusCode::from_u16(status).unwrap(), body).into_response()
        }
        UpstreamBehavior::Slow(delay) => {
            tokio::time::sleep(delay).await;
            (StatusCode::OK, echoed).into_response()
        }
    }
}

pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
}

impl TestApp {
    pub async fn spawn(upstream: Option<&str>) -> Self {
        Self::spawn_with(upstream, |_| {}).await
    }

    pub async fn spawn_with(upstream: Option<&str>, customize: impl FnOnce(&mut RelayConfig)) -> Self {
        let mut config = RelayConfig::default();
        config.common.port = 0; // Random port for testing
        config.upstream.base_url = upstream.map(str::to_string);
        customize(&mut config);

        let app = Application::build(config)
            .await
            .expect("Failed to build test application");
        let port = app.port();

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        let client = reqwest::Client::new();
        let health_url = format!("http://127.0.0.1:{}/health", port);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        TestApp {
            address: format!("http://127.0.0.1:{}", port),
            client,
        }
    }

    pub async fn upload(&self, filename: &str, content_type: &str, bytes: Vec<u8>) -> reqwest::Response {
        let form = multipart::Form::new().part(
            "file",
            multipart::Part::bytes(bytes)
                .file_name(filename.to_string())
                .mime_str(content_type)
                .unwrap(),
        );

        self.post_form(form).await
    }

    pub async fn post_form(&self, form: multipart::Form) -> reqwest::Response {
        self.client
            .post(format!("{}/analyze", self.address))
            .multipart(form)
            .send()
            .await
            .expect("Failed to execute request.")
    }
}

/// A base URL nobody is listening on.
pub async fn unreachable_base_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}
