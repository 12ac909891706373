//! Items delivered by an [`Adapter`](crate::adapter::Adapter).

use std::collections::BTreeMap;
use tokio::sync::mpsc;

/// A Kafka message copied out of the underlying client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Kafka topic
    pub topic: String,
    /// Kafka partition
    pub partition: i32,
    /// Kafka offset
    pub offset: i64,
    /// Message key (if any)
    pub key: Option<Vec<u8>>,
    /// Message payload (if any)
    pub payload: Option<Vec<u8>>,
    /// Message timestamp (milliseconds since epoch)
    pub timestamp: Option<i64>,
    /// Message headers in wire order
    pub headers: Vec<(String, Option<Vec<u8>>)>,
}

impl Message {
    /// Create a message with only its coordinates and payload set.
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64, payload: &[u8]) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: None,
            payload: Some(payload.to_vec()),
            timestamp: None,
            headers: Vec::new(),
        }
    }

    /// Payload decoded as UTF-8, replacing invalid sequences.
    pub fn payload_lossy(&self) -> Option<String> {
        self.payload
            .as_deref()
            .map(|p| String::from_utf8_lossy(p).into_owned())
    }
}

/// Partitions per topic, sorted for stable output.
pub type TopicPartitions = BTreeMap<String, Vec<i32>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// Partitions are about to be released.
    RebalanceStart,
    /// New partitions were claimed.
    RebalanceOk,
    /// The group failed to rebalance.
    RebalanceError,
}

/// Rebalance notification for the consumer group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    /// Partitions newly assigned to this consumer
    pub claimed: TopicPartitions,
    /// Partitions taken away from this consumer
    pub released: TopicPartitions,
    /// Assignment after the event was applied
    pub current: TopicPartitions,
}

impl Notification {
    pub fn new(kind: NotificationKind) -> Self {
        Self {
            kind,
            claimed: TopicPartitions::new(),
            released: TopicPartitions::new(),
            current: TopicPartitions::new(),
        }
    }
}

/// Messages of a single claimed partition, for adapters that consume
/// partitions individually instead of multiplexing them.
#[derive(Debug)]
pub struct PartitionConsumer {
    pub topic: String,
    pub partition: i32,
    pub messages: mpsc::Receiver<Message>,
}
