use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Narrative prose plus the next choices offered to the player.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedTurn {
    pub narrative: String,
    pub actions: Vec<String>,
}

/// Which chat API dialect a server speaks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Ollama,
    #[serde(rename = "openwebui", alias = "open_webui")]
    OpenWebUi,
}

impl BackendKind {
    /// Selection order used when more than one backend answers.
    pub const PRIORITY: [BackendKind; 2] = [BackendKind::Ollama, BackendKind::OpenWebUi];

    pub fn default_port(self) -> u16 {
        match self {
            BackendKind::Ollama => 11434,
            BackendKind::OpenWebUi => 3000,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Ollama => write!(f, "Ollama"),
            BackendKind::OpenWebUi => write!(f, "OpenWebUI"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(BackendKind::Ollama),
            "openwebui" | "open_webui" | "open-webui" => Ok(BackendKind::OpenWebUi),
            other => Err(format!("unknown backend kind '{other}'")),
        }
    }
}

/// A reachable chat server. Two endpoints are the same server when host and
/// port match, whatever kind or key they were configured with.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackendEndpoint {
    pub host: String,
    pub port: u16,
    pub kind: BackendKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl BackendEndpoint {
    pub fn new(host: impl Into<String>, port: u16, kind: BackendKind) -> Self {
        Self {
            host: host.into(),
            port,
            kind,
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

impl PartialEq for BackendEndpoint {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl Eq for BackendEndpoint {}

impl Hash for BackendEndpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for BackendEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}:{}", self.kind, self.host, self.port)
    }
}
