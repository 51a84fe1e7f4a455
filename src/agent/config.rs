use crate::agent::error::Result;
use crate::agent::provision::MAX_HANDLERS_PER_REQUEST;
use crate::weak_error;
use serde::Deserialize;
use std::time::Duration;

/// Default idle delay before queued trace events are flushed to the host.
pub const DEFAULT_FLUSH_DELAY: Duration = Duration::from_millis(50);

/// Tunables of an agent session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentConfig {
    /// Idle delay between the first queued event and the flush of its batch.
    pub flush_delay: Duration,
    /// Members per `handlers:get` round.
    pub handlers_page_size: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            flush_delay: DEFAULT_FLUSH_DELAY,
            handlers_page_size: MAX_HANDLERS_PER_REQUEST,
        }
    }
}

/// On-disk (and on-wire) shape of [`AgentConfig`], every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    flush_delay_ms: Option<u64>,
    handlers_page_size: Option<usize>,
}

impl From<ConfigFile> for AgentConfig {
    fn from(file: ConfigFile) -> Self {
        let default = AgentConfig::default();
        Self {
            flush_delay: file
                .flush_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(default.flush_delay),
            handlers_page_size: file
                .handlers_page_size
                .filter(|size| *size > 0)
                .unwrap_or(default.handlers_page_size),
        }
    }
}

impl AgentConfig {
    pub fn from_toml(data: &str) -> Result<Self> {
        let file: ConfigFile = toml::de::from_str(data)?;
        Ok(file.into())
    }

    /// Read the `config` object of init parameters. A malformed object is logged and ignored.
    pub fn from_parameters(parameters: &serde_json::Value) -> Self {
        let Some(config) = parameters.get("config") else {
            return Self::default();
        };
        weak_error!(
            serde_json::from_value::<ConfigFile>(config.clone()),
            "malformed `config` parameter:"
        )
        .map(AgentConfig::from)
        .unwrap_or_default()
    }
}
