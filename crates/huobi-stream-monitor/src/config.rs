/*
[INPUT]:  YAML configuration file
[OUTPUT]: Parsed monitor configuration and the derived SessionConfig
[POS]:    Configuration layer - session and subscription setup
[UPDATE]: When adding new configuration options
*/

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, bail};
use huobi_stream_adapter::ws::DEFAULT_ENDPOINT;
use huobi_stream_adapter::{ChannelKind, SessionConfig};
use serde::{Deserialize, Serialize};

/// Top-level configuration for the feed monitor
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    /// Feed WebSocket endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Session tuning overrides
    #[serde(default)]
    pub session: SessionSettings,
    /// Channels to subscribe, e.g. "market.btcusdt.kline.1min"
    #[serde(default)]
    pub topics: Vec<String>,
    /// One-shot request topics issued after subscribing
    #[serde(default)]
    pub requests: Vec<String>,
}

/// Session tuning, all durations in milliseconds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionSettings {
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Unset waits for replies indefinitely
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_ms(),
            receive_timeout_ms: default_receive_timeout_ms(),
            auto_reconnect: default_auto_reconnect(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            queue_capacity: default_queue_capacity(),
            request_timeout_ms: None,
        }
    }
}

impl SessionSettings {
    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            receive_timeout: Duration::from_millis(self.receive_timeout_ms),
            auto_reconnect: self.auto_reconnect,
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            queue_capacity: self.queue_capacity,
            request_timeout: self.request_timeout_ms.map(Duration::from_millis),
        }
    }
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_heartbeat_ms() -> u64 {
    5_000
}

fn default_receive_timeout_ms() -> u64 {
    10_000
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_reconnect_delay_ms() -> u64 {
    1_000
}

fn default_queue_capacity() -> usize {
    1_000
}

impl MonitorConfig {
    /// Load configuration from YAML file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(content).context("parse yaml")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.endpoint.starts_with("ws://") || self.endpoint.starts_with("wss://")) {
            bail!("endpoint must be a ws:// or wss:// url: {}", self.endpoint);
        }
        if self.topics.is_empty() && self.requests.is_empty() {
            bail!("nothing to monitor: configure at least one topic or request");
        }

        let mut seen = HashSet::new();
        for topic in &self.topics {
            if !seen.insert(topic.as_str()) {
                bail!("duplicate topic {topic}");
            }
            if ChannelKind::from_channel(topic).is_none() {
                bail!("unsupported topic {topic}");
            }
        }
        if self.requests.iter().any(|topic| topic.trim().is_empty()) {
            bail!("request topics must not be empty");
        }

        let session = &self.session;
        if session.heartbeat_interval_ms == 0 || session.receive_timeout_ms == 0 {
            bail!("heartbeat_interval_ms and receive_timeout_ms must be non-zero");
        }
        if session.receive_timeout_ms <= session.heartbeat_interval_ms {
            bail!("receive_timeout_ms must exceed heartbeat_interval_ms");
        }
        if session.queue_capacity == 0 {
            bail!("queue_capacity must be non-zero");
        }
        Ok(())
    }
}
