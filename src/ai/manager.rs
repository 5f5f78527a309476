use super::{BackendClient, ChatError, ChatReply, ChatRequest, ChatResult, ChatService, StreamEvent};
use crate::types::BackendKind;
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BackendPreference {
    #[default]
    Auto,
    Explicit(BackendKind),
}

impl FromStr for BackendPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("auto") {
            return Ok(BackendPreference::Auto);
        }
        s.parse().map(BackendPreference::Explicit)
    }
}

impl TryFrom<String> for BackendPreference {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BackendPreference> for String {
    fn from(preference: BackendPreference) -> Self {
        match preference {
            BackendPreference::Auto => "auto".to_string(),
            BackendPreference::Explicit(BackendKind::Ollama) => "ollama".to_string(),
            BackendPreference::Explicit(BackendKind::OpenWebUi) => "openwebui".to_string(),
        }
    }
}

impl fmt::Display for BackendPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendPreference::Auto => write!(f, "auto"),
            BackendPreference::Explicit(kind) => write!(f, "{kind}"),
        }
    }
}

/// Holds every configured server and routes chat calls to one of them.
///
/// Availability only changes in [`BackendManager::refresh`], which probes all
/// servers concurrently and records one flag per server once every probe has
/// finished or timed out.
pub struct BackendManager {
    clients: Vec<BackendClient>,
    preference: BackendPreference,
    probe_timeout: Duration,
    availability: Vec<Option<bool>>,
}

impl BackendManager {
    pub fn new(clients: Vec<BackendClient>, preference: BackendPreference) -> Self {
        let availability = vec![None; clients.len()];
        Self {
            clients,
            preference,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            availability,
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn preference(&self) -> BackendPreference {
        self.preference
    }

    pub fn set_preference(&mut self, preference: BackendPreference) {
        self.preference = preference;
    }

    pub fn clients(&self) -> &[BackendClient] {
        &self.clients
    }

    /// `Some(true)` if any server of this kind answered the last probe,
    /// `None` if none of them has been probed yet.
    pub fn is_available(&self, kind: BackendKind) -> Option<bool> {
        let flags: Vec<Option<bool>> = self
            .clients
            .iter()
            .zip(&self.availability)
            .filter(|(client, _)| client.kind() == kind)
            .map(|(_, flag)| *flag)
            .collect();
        if flags.contains(&Some(true)) {
            Some(true)
        } else if !flags.is_empty() && flags.iter().all(Option::is_some) {
            Some(false)
        } else {
            None
        }
    }

    /// Probes every configured server concurrently and records which ones
    /// answered. Returns one `(kind, available)` pair per configured kind, in
    /// priority order.
    pub async fn refresh(&mut self) -> Vec<(BackendKind, bool)> {
        let timeout = self.probe_timeout;
        let probes = self.clients.iter().map(|client| async move {
            let endpoint = client.endpoint().to_string();
            match tokio::time::timeout(timeout, client.fetch_available_models()).await {
                Ok(Ok(models)) => {
                    debug!("{endpoint} answered with {} models", models.len());
                    true
                }
                Ok(Err(err)) => {
                    warn!("{endpoint} probe failed: {err}");
                    false
                }
                Err(_) => {
                    warn!("{endpoint} probe timed out after {timeout:?}");
                    false
                }
            }
        });
        let results = join_all(probes).await;
        self.availability = results.into_iter().map(Some).collect();

        BackendKind::PRIORITY
            .iter()
            .filter_map(|kind| self.is_available(*kind).map(|up| (*kind, up)))
            .collect()
    }

    /// The client a chat call would go to right now.
    pub fn select(&self) -> ChatResult<&BackendClient> {
        let chosen = match self.preference {
            BackendPreference::Auto => BackendKind::PRIORITY
                .iter()
                .find_map(|kind| self.first_client(*kind, |flag| flag == Some(true))),
            BackendPreference::Explicit(kind) => {
                self.first_client(kind, |flag| flag != Some(false))
            }
        };
        chosen.ok_or(ChatError::NoBackendAvailable)
    }

    fn first_client(
        &self,
        kind: BackendKind,
        usable: impl Fn(Option<bool>) -> bool,
    ) -> Option<&BackendClient> {
        self.clients
            .iter()
            .zip(&self.availability)
            .find(|(client, flag)| client.kind() == kind && usable(**flag))
            .map(|(client, _)| client)
    }
}

#[async_trait]
impl ChatService for BackendManager {
    async fn send_chat(
        &self,
        request: &ChatRequest,
        on_event: &mut (dyn FnMut(StreamEvent) + Send),
    ) -> ChatResult<ChatReply> {
        let client = self.select()?;
        info!("sending turn to {}", client.endpoint());
        client.send_chat(request, on_event).await
    }
}
