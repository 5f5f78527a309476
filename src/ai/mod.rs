//! AI module for Lantern
//!
//! This module talks to locally hosted chat servers that speak either the
//! Ollama or the OpenWebUI dialect of the chat API.
//!
//! # Architecture
//!
//! - `ollama` / `openwebui` - wire formats for each dialect, behind [`LLMBackend`]
//! - `http` - shared request plumbing (timeouts, status handling, line splitting)
//! - `client` - [`BackendClient`], one configured server with streaming support
//! - `manager` - [`BackendManager`], probes several servers and picks one
//!
//! # Usage
//!
//! ```rust,no_run
//! use lantern::ai::{BackendClient, ChatRequest, ChatService, HttpSettings, StreamEvent};
//! use lantern::types::{BackendEndpoint, BackendKind, ChatMessage};
//!
//! # async fn example() -> Result<(), lantern::ai::ChatError> {
//! let endpoint = BackendEndpoint::new("127.0.0.1", 11434, BackendKind::Ollama);
//! let client = BackendClient::connect(&endpoint, &HttpSettings::default())?;
//! let request = ChatRequest::new("llama3.1:latest", vec![ChatMessage::user("Hello!")]);
//! let reply = client.send_chat(&request, &mut |_: StreamEvent| {}).await?;
//! println!("{}", reply.content);
//! # Ok(())
//! # }
//! ```
mod client;
mod http;
mod manager;
mod ollama;
mod openwebui;

use crate::types::{BackendEndpoint, BackendKind, ChatMessage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use client::{BackendClient, ConnectionStatus};
pub use http::HttpSettings;
pub use manager::{BackendManager, BackendPreference};
pub use ollama::{OllamaBackend, parse_ollama_stream_line};
pub use openwebui::{OpenWebUiBackend, parse_openwebui_stream_line};

// ============================================
// Error Types
// ============================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChatError {
    #[error("invalid server URL: {0}")]
    InvalidUrl(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("server returned {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("could not decode server response: {message}")]
    Decoding { message: String, body: String },

    #[error("no server configured")]
    NoServerConfigured,

    #[error("no backend available")]
    NoBackendAvailable,
}

impl ChatError {
    pub fn decoding(message: impl ToString, body: impl Into<String>) -> Self {
        ChatError::Decoding {
            message: message.to_string(),
            body: body.into(),
        }
    }

    /// Short advice shown to the player next to the error.
    pub fn troubleshooting_hint(&self) -> &'static str {
        match self {
            ChatError::InvalidUrl(_) => {
                "Check the server host and port in your settings; the host should not include a scheme or path."
            }
            ChatError::Network(_) => {
                "Make sure the server is running and reachable from this device. Large models can take minutes to load the first time."
            }
            ChatError::HttpStatus { status: 404, .. } => {
                "The server does not know this model or endpoint. Pull the model or pick another one from the model list."
            }
            ChatError::HttpStatus { status: 401 | 403, .. } => {
                "The server rejected the request. Check the API key configured for this server."
            }
            ChatError::HttpStatus { .. } => {
                "The server reported an error. Check its logs for details."
            }
            ChatError::Decoding { .. } => {
                "The server answered in an unexpected format. Check that the backend kind matches the server."
            }
            ChatError::NoServerConfigured => {
                "Configure a server host (LANTERN_OLLAMA_HOST, LANTERN_OPENWEBUI_HOST or the settings file)."
            }
            ChatError::NoBackendAvailable => {
                "None of the configured servers responded. Start Ollama or OpenWebUI and try again."
            }
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            ChatError::InvalidUrl(err.to_string())
        } else {
            ChatError::Network(err.to_string())
        }
    }
}

pub type ChatResult<T> = Result<T, ChatError>;

// ============================================
// Request / Response
// ============================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatOptions {
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            max_output_tokens: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub options: ChatOptions,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: false,
            options: ChatOptions::default(),
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.options.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.options.max_output_tokens = max_tokens;
        self
    }

    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

/// A decoded, non-streamed chat reply.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatResponse {
    pub message: ChatMessage,
    pub done: bool,
    pub token_count: Option<u64>,
    pub duration_ns: Option<i64>,
}

impl ChatResponse {
    pub fn tokens_per_second(&self) -> Option<f64> {
        tokens_per_second(self.token_count, self.duration_ns)
    }
}

/// Generation speed, undefined without a positive duration.
pub fn tokens_per_second(token_count: Option<u64>, duration_ns: Option<i64>) -> Option<f64> {
    let count = token_count?;
    let duration = duration_ns?;
    if duration <= 0 {
        return None;
    }
    Some(count as f64 / (duration as f64 / 1e9))
}

/// Metrics carried by the last line of a streamed reply.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StreamSummary {
    pub token_count: Option<u64>,
    pub duration_ns: Option<i64>,
}

impl StreamSummary {
    pub fn tokens_per_second(&self) -> Option<f64> {
        tokens_per_second(self.token_count, self.duration_ns)
    }
}

/// One decoded line of a streamed body.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StreamPiece {
    pub content: String,
    pub done: bool,
    pub summary: StreamSummary,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    Chunk(String),
    Done { tokens_per_second: Option<f64> },
}

/// What the caller gets back once a chat call resolves.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatReply {
    pub content: String,
    pub tokens_per_second: Option<f64>,
    pub backend: BackendKind,
}

// ============================================
// Traits
// ============================================

/// One server dialect. Implementations only speak the wire protocol; the
/// streaming contract (ordering, single completion) lives in [`BackendClient`].
#[async_trait]
pub trait LLMBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn endpoint(&self) -> &BackendEndpoint;

    async fn list_models(&self) -> ChatResult<Vec<String>>;

    async fn complete(&self, request: &ChatRequest) -> ChatResult<ChatResponse>;

    /// Streams the reply, handing each non-empty piece to `on_chunk` in order.
    async fn stream(
        &self,
        request: &ChatRequest,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> ChatResult<StreamSummary>;
}

/// Anything a game session can send a turn to.
#[async_trait]
pub trait ChatService: Send + Sync {
    async fn send_chat(
        &self,
        request: &ChatRequest,
        on_event: &mut (dyn FnMut(StreamEvent) + Send),
    ) -> ChatResult<ChatReply>;
}

/// Builds the backend matching the endpoint's kind.
pub fn backend_for(
    endpoint: &BackendEndpoint,
    settings: &HttpSettings,
) -> ChatResult<Arc<dyn LLMBackend>> {
    Ok(match endpoint.kind {
        BackendKind::Ollama => Arc::new(OllamaBackend::new(endpoint.clone(), settings)?),
        BackendKind::OpenWebUi => Arc::new(OpenWebUiBackend::new(endpoint.clone(), settings)?),
    })
}

// ============================================
// Model listings
// ============================================

#[derive(Deserialize, Default)]
struct ModelEntry {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct ModelListing {
    #[serde(default)]
    models: Vec<ModelEntry>,
    #[serde(default)]
    data: Vec<ModelEntry>,
}

/// Flattens the `models` / `data` listing shapes into model identifiers.
/// Ollama identifies models by `name`, OpenWebUI by `id`.
pub(crate) fn parse_model_listing(body: &str, kind: BackendKind) -> ChatResult<Vec<String>> {
    let listing: ModelListing =
        serde_json::from_str(body).map_err(|e| ChatError::decoding(e, body))?;

    let ids = listing
        .models
        .into_iter()
        .chain(listing.data)
        .filter_map(|entry| match kind {
            BackendKind::Ollama => entry.name.or(entry.model).or(entry.id),
            BackendKind::OpenWebUi => entry.id.or(entry.name).or(entry.model),
        })
        .filter(|id| !id.trim().is_empty())
        .collect();
    Ok(ids)
}
