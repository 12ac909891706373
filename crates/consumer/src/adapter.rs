use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::message::{Message, Notification, PartitionConsumer, TopicPartitions};
use crate::offsets::OffsetStash;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Highest available offset per topic and partition.
pub type HighWaterMarks = HashMap<String, HashMap<i32, i64>>;

/// Capabilities of the consumer-group client wrapped by the proxy.
///
/// Channel receivers are handed out once; later `take_*` calls return `None`.
/// Offsets passed to the mark and reset operations are those of processed
/// messages.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Stop consuming, commit marked offsets and leave the group.
    ///
    /// The message, error and notification channels close once this returns
    /// successfully.
    async fn close(&self) -> Result<()>;

    /// Commit marked offsets now instead of waiting for the next interval.
    fn commit_offsets(&self) -> Result<()>;

    fn take_errors(&self) -> Option<mpsc::Receiver<Error>>;

    fn take_messages(&self) -> Option<mpsc::Receiver<Message>>;

    fn take_notifications(&self) -> Option<mpsc::UnboundedReceiver<Notification>>;

    /// Only available when partitions are consumed individually.
    fn take_partitions(&self) -> Option<mpsc::Receiver<PartitionConsumer>> {
        None
    }

    fn high_water_marks(&self) -> Result<HighWaterMarks>;

    fn mark_partition_offset(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
        metadata: &str,
    ) -> Result<()>;

    fn reset_partition_offset(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
        metadata: &str,
    ) -> Result<()>;

    /// Partitions currently claimed, per topic.
    fn subscriptions(&self) -> Result<TopicPartitions>;

    fn mark_offset(&self, message: &Message, metadata: &str) -> Result<()> {
        self.mark_partition_offset(&message.topic, message.partition, message.offset, metadata)
    }

    fn mark_offsets(&self, stash: &OffsetStash) -> Result<()> {
        for (topic, partition, info) in stash.iter() {
            self.mark_partition_offset(topic, partition, info.offset, &info.metadata)?;
        }
        Ok(())
    }

    fn reset_offset(&self, message: &Message, metadata: &str) -> Result<()> {
        self.reset_partition_offset(&message.topic, message.partition, message.offset, metadata)
    }

    fn reset_offsets(&self, stash: &OffsetStash) -> Result<()> {
        for (topic, partition, info) in stash.iter() {
            self.reset_partition_offset(topic, partition, info.offset, &info.metadata)?;
        }
        Ok(())
    }
}

/// Builds the adapter for `(brokers, group, topics, client config)`.
///
/// Returning `Ok(None)` leaves the proxy detached: no background tasks are
/// started and the caller drives the consumer itself.
pub type Connector = Arc<
    dyn Fn(&[String], &str, &[String], &ClientConfig) -> Result<Option<Arc<dyn Adapter>>>
        + Send
        + Sync,
>;
