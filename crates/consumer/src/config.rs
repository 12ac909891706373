use crate::error::{Error, Result};
use crate::message::{Message, Notification};
use crate::proxy::ConsumerProxy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Called for every consumed message, together with the proxy that received it.
pub type MessageHandler = Arc<dyn Fn(Message, &ConsumerProxy) + Send + Sync>;

/// Called for every error the consumer reports while running.
pub type ErrorHandler = Arc<dyn Fn(Error) + Send + Sync>;

/// Called for every consumer-group rebalance notification.
pub type NotificationHandler = Arc<dyn Fn(Notification) + Send + Sync>;

/// Where to start consuming when the group has no committed offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitialOffset {
    #[default]
    Newest,
    Oldest,
}

impl InitialOffset {
    /// Value for librdkafka's `auto.offset.reset`.
    pub fn as_reset_policy(&self) -> &'static str {
        match self {
            InitialOffset::Newest => "latest",
            InitialOffset::Oldest => "earliest",
        }
    }
}

/// Settings for the underlying consumer-group client.
///
/// `ClientConfig::default()` holds the client's own base values.
/// [`ClientConfig::proxy_default`] is what the proxy uses when the caller
/// supplies no configuration of its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Offset to start from when the group has none committed
    pub initial_offset: InitialOffset,
    /// Time the group coordinator allows between polls before it considers
    /// this member stalled and rebalances its partitions away
    #[serde(rename = "max_processing_time_ms", with = "millis")]
    pub max_processing_time: Duration,
    /// Group session timeout; must not exceed `max_processing_time`
    #[serde(rename = "session_timeout_ms", with = "millis")]
    pub session_timeout: Duration,
    /// Interval at which marked offsets are committed in the background
    #[serde(rename = "commit_interval_ms", with = "millis")]
    pub commit_interval: Duration,
    /// Deliver consumer errors on the error channel instead of only logging them
    pub return_errors: bool,
    /// Deliver rebalance notifications on the notification channel
    pub return_notifications: bool,
    /// Capacity of the message and error channels
    pub channel_buffer_size: usize,
    /// Optional `client.id`
    pub client_id: Option<String>,
    /// Raw librdkafka properties, applied after everything above
    pub properties: BTreeMap<String, String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            initial_offset: InitialOffset::Newest,
            max_processing_time: Duration::from_secs(300),
            session_timeout: Duration::from_secs(45),
            commit_interval: Duration::from_secs(1),
            return_errors: false,
            return_notifications: false,
            channel_buffer_size: 256,
            client_id: None,
            properties: BTreeMap::new(),
        }
    }
}

impl ClientConfig {
    /// Defaults applied by the proxy: newest offset, 10 second processing
    /// time, errors and notifications returned as channels.
    pub fn proxy_default() -> Self {
        Self {
            initial_offset: InitialOffset::Newest,
            max_processing_time: Duration::from_secs(10),
            session_timeout: Duration::from_secs(6),
            return_errors: true,
            return_notifications: true,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.channel_buffer_size == 0 {
            return Err(Error::InvalidConfig(
                "channel_buffer_size must be greater than zero".to_string(),
            ));
        }
        if self.max_processing_time.is_zero() {
            return Err(Error::InvalidConfig(
                "max_processing_time must be greater than zero".to_string(),
            ));
        }
        if self.session_timeout > self.max_processing_time {
            return Err(Error::InvalidConfig(format!(
                "session_timeout ({:?}) must not exceed max_processing_time ({:?})",
                self.session_timeout, self.max_processing_time
            )));
        }
        Ok(())
    }

    /// Set `max_processing_time`, shortening `session_timeout` to fit under it.
    pub fn with_max_processing_time(mut self, max_processing_time: Duration) -> Self {
        self.max_processing_time = max_processing_time;
        self.session_timeout = self.session_timeout.min(max_processing_time);
        self
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Configuration for a [`ConsumerProxy`].
#[derive(Clone, Default)]
pub struct Config {
    /// Consumer group to join
    pub consumer_group: String,
    /// Kafka brokers (`host:port`)
    pub brokers: Vec<String>,
    /// Topics to subscribe to
    pub topics: Vec<String>,
    /// Required; construction fails without it
    pub message_handler: Option<MessageHandler>,
    pub error_handler: Option<ErrorHandler>,
    pub notification_handler: Option<NotificationHandler>,
    /// Replaces [`ClientConfig::proxy_default`] entirely when set
    pub client_config: Option<ClientConfig>,
}

impl Config {
    pub fn new<B, T>(consumer_group: impl Into<String>, brokers: B, topics: T) -> Self
    where
        B: IntoIterator,
        B::Item: Into<String>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        Self {
            consumer_group: consumer_group.into(),
            brokers: brokers.into_iter().map(Into::into).collect(),
            topics: topics.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn on_message<F>(mut self, handler: F) -> Self
    where
        F: Fn(Message, &ConsumerProxy) + Send + Sync + 'static,
    {
        self.message_handler = Some(Arc::new(handler));
        self
    }

    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(Error) + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    pub fn on_notification<F>(mut self, handler: F) -> Self
    where
        F: Fn(Notification) + Send + Sync + 'static,
    {
        self.notification_handler = Some(Arc::new(handler));
        self
    }

    pub fn with_client_config(mut self, client_config: ClientConfig) -> Self {
        self.client_config = Some(client_config);
        self
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("consumer_group", &self.consumer_group)
            .field("brokers", &self.brokers)
            .field("topics", &self.topics)
            .field("message_handler", &self.message_handler.is_some())
            .field("error_handler", &self.error_handler.is_some())
            .field("notification_handler", &self.notification_handler.is_some())
            .field("client_config", &self.client_config)
            .finish()
    }
}
