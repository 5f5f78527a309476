use super::http::{self, HttpSettings, LineControl};
use super::{
    ChatError, ChatRequest, ChatResponse, ChatResult, LLMBackend, StreamPiece, StreamSummary,
};
use crate::types::{BackendEndpoint, BackendKind, ChatMessage};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const TAGS_PATH: &str = "/api/tags";
const CHAT_PATH: &str = "/api/chat";

pub struct OllamaBackend {
    client: Client,
    endpoint: BackendEndpoint,
    base: Url,
}

impl OllamaBackend {
    pub fn new(endpoint: BackendEndpoint, settings: &HttpSettings) -> ChatResult<Self> {
        let base = http::base_url(&endpoint)?;
        Ok(Self {
            client: settings.build_client()?,
            endpoint,
            base,
        })
    }
}

#[derive(Serialize)]
pub(crate) struct WireOptions {
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: WireOptions,
}

impl<'a> From<&'a ChatRequest> for OllamaChatRequest<'a> {
    fn from(request: &'a ChatRequest) -> Self {
        Self {
            model: &request.model,
            messages: &request.messages,
            stream: request.stream,
            options: WireOptions {
                temperature: request.options.temperature,
                num_predict: request.options.max_output_tokens,
            },
        }
    }
}

#[derive(Deserialize, Debug)]
pub(crate) struct OllamaMessage {
    #[serde(default)]
    pub content: String,
}

/// Shape of both the buffered reply and every streamed line.
#[derive(Deserialize, Debug)]
pub(crate) struct OllamaChatResponse {
    pub message: Option<OllamaMessage>,
    #[serde(default)]
    pub done: bool,
    pub eval_count: Option<u64>,
    pub eval_duration: Option<i64>,
    #[allow(dead_code)]
    pub prompt_eval_count: Option<u64>,
    #[allow(dead_code)]
    pub prompt_eval_duration: Option<i64>,
}

impl OllamaChatResponse {
    pub fn into_piece(self) -> StreamPiece {
        StreamPiece {
            content: self.message.map(|m| m.content).unwrap_or_default(),
            done: self.done,
            summary: StreamSummary {
                token_count: self.eval_count,
                duration_ns: self.eval_duration,
            },
        }
    }
}

/// Decodes one NDJSON line. Blank or malformed lines give `None`.
pub fn parse_ollama_stream_line(line_with_ws: &str) -> Option<StreamPiece> {
    let line = line_with_ws.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<OllamaChatResponse>(line) {
        Ok(parsed) => Some(parsed.into_piece()),
        Err(e) => {
            warn!("dropping undecodable stream line ({e}): {line}");
            None
        }
    }
}

#[async_trait]
impl LLMBackend for OllamaBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Ollama
    }

    fn endpoint(&self) -> &BackendEndpoint {
        &self.endpoint
    }

    async fn list_models(&self) -> ChatResult<Vec<String>> {
        let url = http::join(&self.base, TAGS_PATH)?;
        debug!("listing models from {url}");
        let body = http::send_for_body(self.client.get(url)).await?;
        super::parse_model_listing(&body, BackendKind::Ollama)
    }

    async fn complete(&self, request: &ChatRequest) -> ChatResult<ChatResponse> {
        let url = http::join(&self.base, CHAT_PATH)?;
        let mut wire = OllamaChatRequest::from(request);
        wire.stream = false;
        debug!("POST {url} model={} messages={}", request.model, request.messages.len());

        let body = http::send_for_body(self.client.post(url).json(&wire)).await?;
        let parsed: OllamaChatResponse =
            serde_json::from_str(&body).map_err(|e| ChatError::decoding(e, body.as_str()))?;
        let message = parsed
            .message
            .ok_or_else(|| ChatError::decoding("response has no message", body.as_str()))?;

        Ok(ChatResponse {
            message: ChatMessage::assistant(message.content),
            done: parsed.done,
            token_count: parsed.eval_count,
            duration_ns: parsed.eval_duration,
        })
    }

    async fn stream(
        &self,
        request: &ChatRequest,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> ChatResult<StreamSummary> {
        let url = http::join(&self.base, CHAT_PATH)?;
        let mut wire = OllamaChatRequest::from(request);
        wire.stream = true;
        debug!("POST {url} (streaming) model={}", request.model);

        let response = http::send_for_stream(self.client.post(url).json(&wire)).await?;

        let mut summary = StreamSummary::default();
        http::for_each_line(response, |line| {
            let Some(piece) = parse_ollama_stream_line(line) else {
                return LineControl::Continue;
            };
            if !piece.content.is_empty() {
                on_chunk(&piece.content);
            }
            if piece.done {
                summary = piece.summary;
                LineControl::Stop
            } else {
                LineControl::Continue
            }
        })
        .await?;

        Ok(summary)
    }
}
