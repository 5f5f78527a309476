use super::http::{self, HttpSettings, LineControl};
use super::ollama::{OllamaChatResponse, WireOptions};
use super::{
    ChatError, ChatRequest, ChatResponse, ChatResult, LLMBackend, StreamPiece, StreamSummary,
};
use crate::types::{BackendEndpoint, BackendKind, ChatMessage};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const MODELS_PATH: &str = "/api/models";
const CHAT_PATH: &str = "/api/chat/completions";

pub struct OpenWebUiBackend {
    client: Client,
    endpoint: BackendEndpoint,
    base: Url,
}

impl OpenWebUiBackend {
    pub fn new(endpoint: BackendEndpoint, settings: &HttpSettings) -> ChatResult<Self> {
        let base = http::base_url(&endpoint)?;
        Ok(Self {
            client: settings.build_client()?,
            endpoint,
            base,
        })
    }
}

/// OpenAI-compatible body; `options` is kept for Ollama-backed models.
#[derive(Serialize)]
struct OpenWebUiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    options: WireOptions,
}

impl<'a> OpenWebUiRequest<'a> {
    fn new(request: &'a ChatRequest, stream: bool) -> Self {
        Self {
            model: &request.model,
            messages: &request.messages,
            stream,
            temperature: request.options.temperature,
            max_tokens: request.options.max_output_tokens,
            options: WireOptions {
                temperature: request.options.temperature,
                num_predict: request.options.max_output_tokens,
            },
        }
    }
}

#[derive(Deserialize)]
struct OAIMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OAIDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OAIChoice {
    #[serde(default)]
    message: Option<OAIMessage>,
    #[serde(default)]
    delta: Option<OAIDelta>,
}

#[derive(Deserialize)]
struct OAIUsage {
    #[serde(default)]
    completion_tokens: Option<u64>,
}

#[derive(Deserialize)]
struct OAIResponse {
    choices: Vec<OAIChoice>,
    #[serde(default)]
    usage: Option<OAIUsage>,
}

/// Decodes one streamed line, either raw NDJSON or an SSE `data:` line, in
/// OpenAI or Ollama shape. Blank, comment and malformed lines give `None`.
pub fn parse_openwebui_stream_line(line_with_ws: &str) -> Option<StreamPiece> {
    let mut line = line_with_ws.trim();
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    if let Some(rest) = line.strip_prefix("data:") {
        line = rest.trim_start();
    } else if line.starts_with("event:") || line.starts_with("id:") {
        return None;
    }
    if line == "[DONE]" {
        return Some(StreamPiece {
            done: true,
            ..StreamPiece::default()
        });
    }

    if let Ok(parsed) = serde_json::from_str::<OAIResponse>(line) {
        let mut piece = StreamPiece {
            summary: StreamSummary {
                token_count: parsed.usage.and_then(|u| u.completion_tokens),
                duration_ns: None,
            },
            ..StreamPiece::default()
        };
        if let Some(choice) = parsed.choices.into_iter().next() {
            let text = choice
                .delta
                .and_then(|d| d.content)
                .or_else(|| choice.message.and_then(|m| m.content));
            piece.content = text.unwrap_or_default();
        }
        return Some(piece);
    }

    match serde_json::from_str::<OllamaChatResponse>(line) {
        Ok(parsed) => Some(parsed.into_piece()),
        Err(e) => {
            warn!("dropping undecodable stream line ({e}): {line}");
            None
        }
    }
}

fn parse_completion(body: &str) -> ChatResult<ChatResponse> {
    if let Ok(parsed) = serde_json::from_str::<OAIResponse>(body) {
        let token_count = parsed.usage.and_then(|u| u.completion_tokens);
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|m| m.content)
            .ok_or_else(|| ChatError::decoding("response has no choices", body))?;
        return Ok(ChatResponse {
            message: ChatMessage::assistant(content),
            done: true,
            token_count,
            duration_ns: None,
        });
    }

    let parsed: OllamaChatResponse =
        serde_json::from_str(body).map_err(|e| ChatError::decoding(e, body))?;
    let message = parsed
        .message
        .ok_or_else(|| ChatError::decoding("response has no message", body))?;
    Ok(ChatResponse {
        message: ChatMessage::assistant(message.content),
        done: parsed.done,
        token_count: parsed.eval_count,
        duration_ns: parsed.eval_duration,
    })
}

#[async_trait]
impl LLMBackend for OpenWebUiBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::OpenWebUi
    }

    fn endpoint(&self) -> &BackendEndpoint {
        &self.endpoint
    }

    async fn list_models(&self) -> ChatResult<Vec<String>> {
        let url = http::join(&self.base, MODELS_PATH)?;
        debug!("listing models from {url}");
        let request = http::authorize(self.client.get(url), &self.endpoint);
        let body = http::send_for_body(request).await?;
        super::parse_model_listing(&body, BackendKind::OpenWebUi)
    }

    async fn complete(&self, request: &ChatRequest) -> ChatResult<ChatResponse> {
        let url = http::join(&self.base, CHAT_PATH)?;
        debug!("POST {url} model={} messages={}", request.model, request.messages.len());
        let builder = self.client.post(url).json(&OpenWebUiRequest::new(request, false));
        let body = http::send_for_body(http::authorize(builder, &self.endpoint)).await?;
        parse_completion(&body)
    }

    async fn stream(
        &self,
        request: &ChatRequest,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> ChatResult<StreamSummary> {
        let url = http::join(&self.base, CHAT_PATH)?;
        debug!("POST {url} (streaming) model={}", request.model);
        let builder = self
            .client
            .post(url)
            .header("accept", "text/event-stream, application/x-ndjson")
            .json(&OpenWebUiRequest::new(request, true));
        let response = http::send_for_stream(http::authorize(builder, &self.endpoint)).await?;

        let mut summary = StreamSummary::default();
        http::for_each_line(response, |line| {
            let Some(piece) = parse_openwebui_stream_line(line) else {
                return LineControl::Continue;
            };
            if !piece.content.is_empty() {
                on_chunk(&piece.content);
            }
            if piece.summary.token_count.is_some() {
                summary = piece.summary;
            }
            if piece.done {
                LineControl::Stop
            } else {
                LineControl::Continue
            }
        })
        .await?;

        Ok(summary)
    }
}
