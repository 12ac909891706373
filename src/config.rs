//! Consumer settings from command-line options and an optional TOML file.

mod duration;

pub use duration::parse_duration;

use anyhow::Context;
use clap::Args;
use kafka_proxy_consumer::{ClientConfig, InitialOffset};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Options for joining a consumer group.
///
/// Values given on the command line take precedence over the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct ConsumeOpts {
    /// Kafka brokers (comma-separated or multiple --brokers)
    #[arg(long, value_delimiter = ',', env = "KAFKA_BROKERS")]
    pub brokers: Vec<String>,

    /// Consumer group ID
    #[arg(long, env = "KAFKA_GROUP")]
    pub group: Option<String>,

    /// Topics to subscribe to (comma-separated or multiple --topics)
    #[arg(long, value_delimiter = ',')]
    pub topics: Vec<String>,

    /// TOML file with consumer settings; its [client] table replaces the
    /// proxy's client defaults entirely
    #[arg(long)]
    pub config_file: Option<PathBuf>,

    /// Start from the oldest offset when the group has none committed
    #[arg(long)]
    pub from_beginning: bool,

    /// Maximum time between polls before the group rebalances this member
    /// away (e.g. "10s", "2m")
    #[arg(long, value_parser = parse_duration)]
    pub max_processing_time: Option<Duration>,

    /// Mark every printed message as processed
    #[arg(long)]
    pub mark_offsets: bool,

    /// Close the consumer after this many messages
    #[arg(long)]
    pub max_messages: Option<u64>,

    /// Log every message and rebalance; consumer errors become fatal
    #[arg(long)]
    pub log: bool,
}

/// Contents of `--config-file`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub consumer_group: Option<String>,
    pub brokers: Vec<String>,
    pub topics: Vec<String>,
    pub client: Option<ClientConfig>,
}

impl FileConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {path:?}"))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file {path:?}"))
    }
}

/// Settings after merging command-line options with the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSettings {
    pub group: String,
    pub brokers: Vec<String>,
    pub topics: Vec<String>,
    /// `None` lets the proxy apply its own defaults
    pub client_config: Option<ClientConfig>,
}

impl ConsumeOpts {
    pub fn resolve(&self) -> anyhow::Result<ConsumerSettings> {
        let file = match &self.config_file {
            Some(path) => FileConfig::from_file(path)?,
            None => FileConfig::default(),
        };

        let group = self
            .group
            .clone()
            .or(file.consumer_group)
            .context("Consumer group not set: pass --group or set consumer_group in the config file")?;
        let brokers = if self.brokers.is_empty() {
            file.brokers
        } else {
            self.brokers.clone()
        };
        let topics = if self.topics.is_empty() {
            file.topics
        } else {
            self.topics.clone()
        };

        let mut client_config = file.client.map(|mut config| {
            // A [client] table that only lowers max_processing_time keeps the
            // base session timeout, which would no longer fit under it.
            if config.session_timeout > config.max_processing_time {
                tracing::warn!(
                    "session_timeout_ms lowered from {:?} to max_processing_time_ms ({:?})",
                    config.session_timeout,
                    config.max_processing_time
                );
                config.session_timeout = config.max_processing_time;
            }
            config
        });
        if self.from_beginning || self.max_processing_time.is_some() {
            let mut config = client_config.unwrap_or_else(ClientConfig::proxy_default);
            if self.from_beginning {
                config.initial_offset = InitialOffset::Oldest;
            }
            if let Some(max_processing_time) = self.max_processing_time {
                config = config.with_max_processing_time(max_processing_time);
            }
            client_config = Some(config);
        }

        Ok(ConsumerSettings {
            group,
            brokers,
            topics,
            client_config,
        })
    }
}
