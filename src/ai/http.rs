use super::{ChatError, ChatResult};
use crate::types::BackendEndpoint;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response, Url};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_RESOURCE_TIMEOUT: Duration = Duration::from_secs(600);

/// Timeouts for talking to a local inference server. Local models can take
/// minutes before the first byte, so both are generous.
#[derive(Clone, Debug, PartialEq)]
pub struct HttpSettings {
    /// Bounds establishing the connection.
    pub request_timeout: Duration,
    /// Bounds the whole exchange, streamed body included.
    pub resource_timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            resource_timeout: DEFAULT_RESOURCE_TIMEOUT,
        }
    }
}

impl HttpSettings {
    pub fn build_client(&self) -> ChatResult<Client> {
        Client::builder()
            .connect_timeout(self.request_timeout)
            .timeout(self.resource_timeout)
            .build()
            .map_err(|e| ChatError::Network(e.to_string()))
    }
}

pub fn base_url(endpoint: &BackendEndpoint) -> ChatResult<Url> {
    let host = endpoint.host.trim();
    if host.is_empty() {
        return Err(ChatError::NoServerConfigured);
    }
    if host.contains("://") || host.contains('/') {
        return Err(ChatError::InvalidUrl(host.to_string()));
    }
    let raw = format!("http://{host}:{}", endpoint.port);
    Url::parse(&raw).map_err(|e| ChatError::InvalidUrl(format!("{raw}: {e}")))
}

pub fn join(base: &Url, path: &str) -> ChatResult<Url> {
    base.join(path)
        .map_err(|e| ChatError::InvalidUrl(format!("{base}{path}: {e}")))
}

pub fn authorize(request: RequestBuilder, endpoint: &BackendEndpoint) -> RequestBuilder {
    match &endpoint.api_key {
        Some(key) if !key.is_empty() => request.bearer_auth(key),
        _ => request,
    }
}

/// Sends the request and returns the body of a 2xx response.
pub async fn send_for_body(request: RequestBuilder) -> ChatResult<String> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(ChatError::HttpStatus {
            status: status.as_u16(),
            body,
        })
    }
}

/// Sends the request and hands back the response for streaming if it is 2xx.
pub async fn send_for_stream(request: RequestBuilder) -> ChatResult<Response> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ChatError::HttpStatus {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

pub enum LineControl {
    Continue,
    Stop,
}

/// Splits a byte stream into lines. Works on bytes so a multi-byte
/// character cut across two network chunks survives.
#[derive(Default)]
pub struct LineSplitter {
    buffer: Vec<u8>,
}

impl LineSplitter {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Whatever is left once the body ends without a trailing newline.
    pub fn finish(self) -> Option<String> {
        let rest = String::from_utf8_lossy(&self.buffer).trim().to_string();
        if rest.is_empty() { None } else { Some(rest) }
    }
}

/// Feeds every line of the body to `on_line` until it asks to stop or the
/// body ends.
pub async fn for_each_line(
    response: Response,
    mut on_line: impl FnMut(&str) -> LineControl + Send,
) -> ChatResult<()> {
    let mut splitter = LineSplitter::default();
    let mut stream = response.bytes_stream();
    while let Some(item) = stream.next().await {
        let bytes = item.map_err(|e| {
            warn!("stream interrupted: {e}");
            ChatError::from(e)
        })?;
        for line in splitter.push(&bytes) {
            if let LineControl::Stop = on_line(&line) {
                debug!("stream finished on done marker");
                return Ok(());
            }
        }
    }
    if let Some(line) = splitter.finish() {
        on_line(&line);
    }
    Ok(())
}
