//! Runtime settings.
//!
//! Sources, later ones winning: built-in defaults, the JSON settings file
//! (`LANTERN_CONFIG`, else `<config dir>/lantern/settings.json`), then
//! `LANTERN_*` environment variables. The binary loads `.env` before any of
//! this runs.

use crate::ai::{BackendClient, BackendManager, BackendPreference, ChatResult, HttpSettings};
use crate::session::SessionOptions;
use crate::types::{BackendEndpoint, BackendKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

pub const CONFIG_PATH_VAR: &str = "LANTERN_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read settings file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
}

/// One server entry. A missing port means the kind's usual port.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    pub kind: BackendKind,
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl ServerSettings {
    pub fn local(kind: BackendKind) -> Self {
        Self {
            kind,
            host: "127.0.0.1".to_string(),
            port: None,
            api_key: None,
        }
    }

    pub fn endpoint(&self) -> BackendEndpoint {
        let endpoint = BackendEndpoint::new(
            self.host.trim(),
            self.port.unwrap_or(self.kind.default_port()),
            self.kind,
        );
        match &self.api_key {
            Some(key) if !key.trim().is_empty() => endpoint.with_api_key(key.trim()),
            _ => endpoint,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub servers: Vec<ServerSettings>,
    pub backend: BackendPreference,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub streaming: bool,
    pub request_timeout_secs: u64,
    pub resource_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub theme: String,
}

impl Default for Settings {
    fn default() -> Self {
        let session = SessionOptions::default();
        Self {
            servers: vec![ServerSettings::local(BackendKind::Ollama)],
            backend: BackendPreference::Auto,
            model: session.model,
            temperature: session.temperature,
            max_tokens: session.max_tokens,
            streaming: session.streaming,
            request_timeout_secs: 120,
            resource_timeout_secs: 600,
            probe_timeout_secs: 5,
            theme: session.theme,
        }
    }
}

impl Settings {
    /// Loads settings from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Loads settings, reading variables through `lookup`.
    pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut settings = match lookup(CONFIG_PATH_VAR) {
            Some(path) if !path.trim().is_empty() => Self::from_file(Path::new(path.trim()))?,
            _ => match default_path() {
                Some(path) if path.is_file() => Self::from_file(&path)?,
                _ => {
                    debug!("no settings file, using defaults");
                    Self::default()
                }
            },
        };
        settings.apply_env(&lookup)?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Applies `LANTERN_*` overrides.
    pub fn apply_env(&mut self, lookup: &dyn Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        self.apply_server_env(BackendKind::Ollama, "LANTERN_OLLAMA", &get)?;
        self.apply_server_env(BackendKind::OpenWebUi, "LANTERN_OPENWEBUI", &get)?;

        if let Some(value) = get("LANTERN_BACKEND") {
            self.backend = parse("LANTERN_BACKEND", &value)?;
        }
        if let Some(value) = get("LANTERN_MODEL") {
            self.model = value;
        }
        if let Some(value) = get("LANTERN_TEMPERATURE") {
            self.temperature = parse("LANTERN_TEMPERATURE", &value)?;
        }
        if let Some(value) = get("LANTERN_MAX_TOKENS") {
            self.max_tokens = Some(parse("LANTERN_MAX_TOKENS", &value)?);
        }
        if let Some(value) = get("LANTERN_STREAMING") {
            self.streaming = parse_bool("LANTERN_STREAMING", &value)?;
        }
        if let Some(value) = get("LANTERN_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = parse("LANTERN_REQUEST_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = get("LANTERN_RESOURCE_TIMEOUT_SECS") {
            self.resource_timeout_secs = parse("LANTERN_RESOURCE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = get("LANTERN_PROBE_TIMEOUT_SECS") {
            self.probe_timeout_secs = parse("LANTERN_PROBE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = get("LANTERN_THEME") {
            self.theme = value;
        }
        Ok(())
    }

    /// `<prefix>_HOST`, `<prefix>_PORT` and `<prefix>_API_KEY` edit the first
    /// server of `kind`, adding a local one if none is configured.
    fn apply_server_env(
        &mut self,
        kind: BackendKind,
        prefix: &str,
        get: &dyn Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let host = get(&format!("{prefix}_HOST"));
        let port_key = format!("{prefix}_PORT");
        let port = match get(&port_key) {
            Some(value) => Some(parse::<u16>(&port_key, &value)?),
            None => None,
        };
        let api_key = get(&format!("{prefix}_API_KEY"));

        if host.is_none() && port.is_none() && api_key.is_none() {
            return Ok(());
        }

        let index = match self.servers.iter().position(|s| s.kind == kind) {
            Some(index) => index,
            None => {
                self.servers.push(ServerSettings::local(kind));
                self.servers.len() - 1
            }
        };
        let server = &mut self.servers[index];
        if let Some(host) = host {
            server.host = host;
        }
        if port.is_some() {
            server.port = port;
        }
        if api_key.is_some() {
            server.api_key = api_key;
        }
        Ok(())
    }

    pub fn endpoints(&self) -> Vec<BackendEndpoint> {
        self.servers.iter().map(ServerSettings::endpoint).collect()
    }

    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            resource_timeout: Duration::from_secs(self.resource_timeout_secs),
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            streaming: self.streaming,
            theme: self.theme.clone(),
        }
    }

    /// One client per configured server, in configuration order.
    pub fn build_manager(&self) -> ChatResult<BackendManager> {
        let http = self.http_settings();
        let clients = self
            .endpoints()
            .iter()
            .map(|endpoint| BackendClient::connect(endpoint, &http))
            .collect::<ChatResult<Vec<_>>>()?;
        Ok(BackendManager::new(clients, self.backend)
            .with_probe_timeout(Duration::from_secs(self.probe_timeout_secs)))
    }
}

pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("lantern").join("settings.json"))
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}
