use super::{
    ChatReply, ChatRequest, ChatResult, ChatService, HttpSettings, LLMBackend, StreamEvent,
    backend_for,
};
use crate::types::{BackendEndpoint, BackendKind};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of the last connection probe, ready to show in a status line.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub status: String,
    pub models: Vec<String>,
}

/// One configured chat server.
#[derive(Clone)]
pub struct BackendClient {
    backend: Arc<dyn LLMBackend>,
    status: ConnectionStatus,
}

impl BackendClient {
    pub fn new(backend: Arc<dyn LLMBackend>) -> Self {
        Self {
            backend,
            status: ConnectionStatus {
                connected: false,
                status: "Not checked".to_string(),
                models: Vec::new(),
            },
        }
    }

    /// Builds the right dialect for `endpoint`.
    pub fn connect(endpoint: &BackendEndpoint, settings: &HttpSettings) -> ChatResult<Self> {
        Ok(Self::new(backend_for(endpoint, settings)?))
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn endpoint(&self) -> &BackendEndpoint {
        self.backend.endpoint()
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    pub async fn fetch_available_models(&self) -> ChatResult<Vec<String>> {
        self.backend.list_models().await
    }

    /// Probes the server by listing its models. Failures land in the
    /// returned status instead of an error.
    pub async fn check_connection(&mut self) -> &ConnectionStatus {
        let endpoint = self.backend.endpoint().to_string();
        self.status = match self.backend.list_models().await {
            Ok(models) => {
                info!("connected to {endpoint}, {} models", models.len());
                ConnectionStatus {
                    connected: true,
                    status: format!("Connected to {endpoint} ({} models)", models.len()),
                    models,
                }
            }
            Err(err) => {
                warn!("connection check for {endpoint} failed: {err}");
                ConnectionStatus {
                    connected: false,
                    status: format!("Cannot reach {endpoint}: {err}"),
                    models: Vec::new(),
                }
            }
        };
        &self.status
    }
}

#[async_trait]
impl ChatService for BackendClient {
    /// Buffered requests emit no events. Streamed requests emit every chunk
    /// in arrival order followed by exactly one `Done`; errors emit no `Done`.
    async fn send_chat(
        &self,
        request: &ChatRequest,
        on_event: &mut (dyn FnMut(StreamEvent) + Send),
    ) -> ChatResult<ChatReply> {
        let kind = self.backend.kind();

        if !request.stream {
            let response = self.backend.complete(request).await?;
            debug!(
                "{kind} replied with {} chars",
                response.message.content.len()
            );
            return Ok(ChatReply {
                tokens_per_second: response.tokens_per_second(),
                content: response.message.content,
                backend: kind,
            });
        }

        let mut content = String::new();
        let summary = self
            .backend
            .stream(request, &mut |piece: &str| {
                content.push_str(piece);
                on_event(StreamEvent::Chunk(piece.to_string()));
            })
            .await?;

        let tokens_per_second = summary.tokens_per_second();
        on_event(StreamEvent::Done { tokens_per_second });
        debug!("{kind} stream finished, {} chars", content.len());

        Ok(ChatReply {
            content,
            tokens_per_second,
            backend: kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{ChatError, ChatResponse, StreamSummary};
    use crate::types::ChatMessage;

    struct ScriptedBackend {
        endpoint: BackendEndpoint,
        pieces: Vec<&'static str>,
        summary: StreamSummary,
    }

    #[async_trait]
    impl LLMBackend for ScriptedBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Ollama
        }

        fn endpoint(&self) -> &BackendEndpoint {
            &self.endpoint
        }

        async fn list_models(&self) -> ChatResult<Vec<String>> {
            Err(ChatError::Network("connection refused".into()))
        }

        async fn complete(&self, _request: &ChatRequest) -> ChatResult<ChatResponse> {
            Ok(ChatResponse {
                message: ChatMessage::assistant(self.pieces.concat()),
                done: true,
                token_count: Some(10),
                duration_ns: Some(1_000_000_000),
            })
        }

        async fn stream(
            &self,
            _request: &ChatRequest,
            on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
        ) -> ChatResult<StreamSummary> {
            for piece in &self.pieces {
                on_chunk(piece);
            }
            Ok(self.summary.clone())
        }
    }

    fn client(pieces: Vec<&'static str>, summary: StreamSummary) -> BackendClient {
        BackendClient::new(Arc::new(ScriptedBackend {
            endpoint: BackendEndpoint::new("localhost", 11434, BackendKind::Ollama),
            pieces,
            summary,
        }))
    }

    #[tokio::test]
    async fn streaming_delivers_chunks_then_one_done() {
        let client = client(
            vec!["Hello, ", "world"],
            StreamSummary {
                token_count: Some(50),
                duration_ns: Some(2_000_000_000),
            },
        );
        let request = ChatRequest::new("m", vec![]).streaming(true);

        let mut events = Vec::new();
        let reply = client
            .send_chat(&request, &mut |event: StreamEvent| events.push(event))
            .await
            .unwrap();

        assert_eq!(reply.content, "Hello, world");
        assert_eq!(reply.tokens_per_second, Some(25.0));
        assert_eq!(
            events,
            vec![
                StreamEvent::Chunk("Hello, ".into()),
                StreamEvent::Chunk("world".into()),
                StreamEvent::Done {
                    tokens_per_second: Some(25.0)
                },
            ]
        );
    }

    #[tokio::test]
    async fn missing_metrics_still_complete_once() {
        let client = client(vec!["a"], StreamSummary::default());
        let request = ChatRequest::new("m", vec![]).streaming(true);

        let mut done_count = 0;
        client
            .send_chat(&request, &mut |event: StreamEvent| {
                if let StreamEvent::Done { tokens_per_second } = event {
                    assert_eq!(tokens_per_second, None);
                    done_count += 1;
                }
            })
            .await
            .unwrap();
        assert_eq!(done_count, 1);
    }

    #[tokio::test]
    async fn buffered_request_emits_nothing() {
        let client = client(vec!["You ", "wake."], StreamSummary::default());
        let request = ChatRequest::new("m", vec![]);

        let mut events = 0;
        let reply = client
            .send_chat(&request, &mut |_: StreamEvent| events += 1)
            .await
            .unwrap();
        assert_eq!(reply.content, "You wake.");
        assert_eq!(reply.tokens_per_second, Some(10.0));
        assert_eq!(events, 0);
    }

    #[tokio::test]
    async fn check_connection_reports_failure_without_error() {
        let mut client = client(vec![], StreamSummary::default());
        let status = client.check_connection().await;
        assert!(!status.connected);
        assert!(status.status.contains("connection refused"));
    }
}
