mod support;

use lantern::ai::{
    BackendClient, BackendManager, BackendPreference, ChatError, ChatRequest, ChatService,
    HttpSettings, StreamEvent,
};
use lantern::types::{BackendEndpoint, BackendKind, ChatMessage};
use std::time::{Duration, Instant};
use support::{Route, StubServer, closed_port};
use tokio::net::TcpListener;

const OLLAMA_TAGS: &str = r#"{"models":[{"name":"llama3.1:latest"}]}"#;
const WEBUI_MODELS: &str = r#"{"data":[{"id":"llama3.1:latest"}]}"#;

fn client(kind: BackendKind, port: u16) -> BackendClient {
    let endpoint = BackendEndpoint::new("127.0.0.1", port, kind);
    BackendClient::connect(&endpoint, &HttpSettings::default()).unwrap()
}

async fn ollama_server() -> StubServer {
    StubServer::start(vec![
        Route::json("GET", "/api/tags", OLLAMA_TAGS),
        Route::json(
            "POST",
            "/api/chat",
            r#"{"message":{"role":"assistant","content":"from ollama"},"done":true}"#,
        ),
    ])
    .await
}

async fn webui_server() -> StubServer {
    StubServer::start(vec![
        Route::json("GET", "/api/models", WEBUI_MODELS),
        Route::json(
            "POST",
            "/api/chat/completions",
            r#"{"choices":[{"message":{"role":"assistant","content":"from openwebui"}}]}"#,
        ),
    ])
    .await
}

fn request() -> ChatRequest {
    ChatRequest::new("llama3.1:latest", vec![ChatMessage::user("Hello")])
}

#[tokio::test]
async fn auto_prefers_ollama_when_both_answer() {
    let ollama = ollama_server().await;
    let webui = webui_server().await;
    let mut manager = BackendManager::new(
        vec![
            client(BackendKind::OpenWebUi, webui.port),
            client(BackendKind::Ollama, ollama.port),
        ],
        BackendPreference::Auto,
    );

    let report = manager.refresh().await;
    assert_eq!(
        report,
        vec![(BackendKind::Ollama, true), (BackendKind::OpenWebUi, true)]
    );
    assert_eq!(manager.select().unwrap().kind(), BackendKind::Ollama);

    let reply = manager
        .send_chat(&request(), &mut |_: StreamEvent| {})
        .await
        .unwrap();
    assert_eq!(reply.content, "from ollama");
    assert_eq!(reply.backend, BackendKind::Ollama);
}

#[tokio::test]
async fn auto_falls_back_to_openwebui() {
    let webui = webui_server().await;
    let mut manager = BackendManager::new(
        vec![
            client(BackendKind::Ollama, closed_port()),
            client(BackendKind::OpenWebUi, webui.port),
        ],
        BackendPreference::Auto,
    );

    manager.refresh().await;
    assert_eq!(manager.is_available(BackendKind::Ollama), Some(false));
    assert_eq!(manager.is_available(BackendKind::OpenWebUi), Some(true));

    let reply = manager
        .send_chat(&request(), &mut |_: StreamEvent| {})
        .await
        .unwrap();
    assert_eq!(reply.content, "from openwebui");
}

#[tokio::test]
async fn nothing_reachable_means_no_backend() {
    let mut manager = BackendManager::new(
        vec![
            client(BackendKind::Ollama, closed_port()),
            client(BackendKind::OpenWebUi, closed_port()),
        ],
        BackendPreference::Auto,
    );

    let report = manager.refresh().await;
    assert_eq!(
        report,
        vec![(BackendKind::Ollama, false), (BackendKind::OpenWebUi, false)]
    );
    let err = manager
        .send_chat(&request(), &mut |_: StreamEvent| {})
        .await
        .unwrap_err();
    assert_eq!(err, ChatError::NoBackendAvailable);
}

#[tokio::test]
async fn auto_needs_a_probe_first() {
    let ollama = ollama_server().await;
    let manager = BackendManager::new(
        vec![client(BackendKind::Ollama, ollama.port)],
        BackendPreference::Auto,
    );
    assert_eq!(manager.is_available(BackendKind::Ollama), None);
    assert!(matches!(
        manager.select(),
        Err(ChatError::NoBackendAvailable)
    ));
}

#[tokio::test]
async fn explicit_preference_uses_unprobed_server() {
    let webui = webui_server().await;
    let ollama = ollama_server().await;
    let manager = BackendManager::new(
        vec![
            client(BackendKind::Ollama, ollama.port),
            client(BackendKind::OpenWebUi, webui.port),
        ],
        BackendPreference::Explicit(BackendKind::OpenWebUi),
    );
    assert_eq!(manager.select().unwrap().kind(), BackendKind::OpenWebUi);
}

#[tokio::test]
async fn explicit_preference_does_not_fall_back() {
    let ollama = ollama_server().await;
    let mut manager = BackendManager::new(
        vec![
            client(BackendKind::Ollama, ollama.port),
            client(BackendKind::OpenWebUi, closed_port()),
        ],
        BackendPreference::Explicit(BackendKind::OpenWebUi),
    );
    manager.refresh().await;
    assert!(matches!(
        manager.select(),
        Err(ChatError::NoBackendAvailable)
    ));

    manager.set_preference(BackendPreference::Auto);
    assert_eq!(manager.select().unwrap().kind(), BackendKind::Ollama);
}

#[tokio::test]
async fn silent_server_times_out_as_unavailable() {
    // Accepts connections but never answers.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let mut manager = BackendManager::new(
        vec![client(BackendKind::Ollama, port)],
        BackendPreference::Auto,
    )
    .with_probe_timeout(Duration::from_millis(200));

    let started = Instant::now();
    let report = manager.refresh().await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(report, vec![(BackendKind::Ollama, false)]);
}
