//! [`Adapter`] backed by an rdkafka `StreamConsumer`.

use crate::adapter::{Adapter, HighWaterMarks};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::lock;
use crate::message::{Message, Notification, NotificationKind, TopicPartitions};
use crate::offsets::OffsetStash;
use async_trait::async_trait;
use rdkafka::config::ClientConfig as RdkafkaClientConfig;
use rdkafka::consumer::{
    BaseConsumer, CommitMode, Consumer as RdkafkaConsumer, ConsumerContext, Rebalance,
    StreamConsumer as RdkafkaStreamConsumer,
};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Headers, Message as RdkafkaMessage};
use rdkafka::{ClientContext, Offset, TopicPartitionList};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type ProxyStreamConsumer = RdkafkaStreamConsumer<ProxyContext>;

/// Connector used by [`ConsumerProxy::new`](crate::ConsumerProxy::new).
pub fn connect(
    brokers: &[String],
    group: &str,
    topics: &[String],
    config: &ClientConfig,
) -> Result<Option<Arc<dyn Adapter>>> {
    let adapter = KafkaAdapter::new(brokers, group, topics, config)?;
    Ok(Some(Arc::new(adapter)))
}

/// Assignment tracking and notification delivery shared with the rebalance
/// callbacks.
#[derive(Debug)]
struct RebalanceState {
    notifications: Mutex<Option<mpsc::UnboundedSender<Notification>>>,
    current: Mutex<TopicPartitions>,
}

impl RebalanceState {
    fn new(notifications: Option<mpsc::UnboundedSender<Notification>>) -> Self {
        Self {
            notifications: Mutex::new(notifications),
            current: Mutex::new(TopicPartitions::new()),
        }
    }

    fn revoked(&self, released: TopicPartitions) -> Notification {
        let mut current = lock(&self.current);
        for (topic, partitions) in &released {
            if let Some(owned) = current.get_mut(topic) {
                owned.retain(|p| !partitions.contains(p));
            }
        }
        current.retain(|_, owned| !owned.is_empty());

        Notification {
            released,
            current: current.clone(),
            ..Notification::new(NotificationKind::RebalanceStart)
        }
    }

    fn assigned(&self, claimed: TopicPartitions) -> Notification {
        let mut current = lock(&self.current);
        for (topic, partitions) in &claimed {
            let owned = current.entry(topic.clone()).or_default();
            owned.extend(partitions.iter().copied());
            owned.sort_unstable();
            owned.dedup();
        }

        Notification {
            claimed,
            current: current.clone(),
            ..Notification::new(NotificationKind::RebalanceOk)
        }
    }

    fn failed(&self) -> Notification {
        Notification {
            current: lock(&self.current).clone(),
            ..Notification::new(NotificationKind::RebalanceError)
        }
    }

    fn notify(&self, notification: Notification) {
        if let Some(tx) = lock(&self.notifications).as_ref() {
            let _ = tx.send(notification);
        }
    }

    fn close_notifications(&self) {
        lock(&self.notifications).take();
    }
}

struct ProxyContext {
    state: Arc<RebalanceState>,
}

impl ClientContext for ProxyContext {}

impl ConsumerContext for ProxyContext {
    fn pre_rebalance(&self, _: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        if let Rebalance::Revoke(tpl) = rebalance {
            let notification = self.state.revoked(to_topic_partitions(tpl));
            debug!("Partitions revoked: {:?}", notification.released);
            self.state.notify(notification);
        }
    }

    fn post_rebalance(&self, _: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(tpl) => {
                let notification = self.state.assigned(to_topic_partitions(tpl));
                debug!("Partitions assigned: {:?}", notification.claimed);
                self.state.notify(notification);
            }
            Rebalance::Revoke(_) => {}
            Rebalance::Error(e) => {
                warn!("Rebalance failed: {e}");
                self.state.notify(self.state.failed());
            }
        }
    }
}

fn to_topic_partitions(tpl: &TopicPartitionList) -> TopicPartitions {
    let mut partitions = TopicPartitions::new();
    for elem in tpl.elements() {
        partitions
            .entry(elem.topic().to_string())
            .or_default()
            .push(elem.partition());
    }
    for owned in partitions.values_mut() {
        owned.sort_unstable();
    }
    partitions
}

fn to_message<M: RdkafkaMessage>(msg: &M) -> Message {
    let headers = msg
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|h| (h.key.to_string(), h.value.map(|v| v.to_vec())))
                .collect()
        })
        .unwrap_or_default();

    Message {
        topic: msg.topic().to_string(),
        partition: msg.partition(),
        offset: msg.offset(),
        key: msg.key().map(|k| k.to_vec()),
        payload: msg.payload().map(|p| p.to_vec()),
        timestamp: msg.timestamp().to_millis(),
        headers,
    }
}

/// Receives from the consumer until shutdown, copying messages and errors
/// onto the adapter's channels.
async fn pump(
    consumer: Arc<ProxyStreamConsumer>,
    messages: mpsc::Sender<Message>,
    errors: Option<mpsc::Sender<Error>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            received = consumer.recv() => {
                let received = received.map(|msg| to_message(&msg));
                match received {
                    Ok(message) => {
                        if messages.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => match &errors {
                        Some(tx) => {
                            if tx.send(Error::Kafka(e)).await.is_err() {
                                break;
                            }
                        }
                        None => warn!("Error receiving message: {e}"),
                    },
                }
            }
        }
    }
    debug!("Consumer pump stopped");
}

/// Consumer-group member built on librdkafka.
///
/// Messages from all claimed partitions are multiplexed onto one channel.
/// Marked offsets go to librdkafka's offset store and are committed by its
/// background auto-commit, by [`Adapter::commit_offsets`], or on close.
pub struct KafkaAdapter {
    consumer: Arc<ProxyStreamConsumer>,
    rebalance: Arc<RebalanceState>,
    messages: Mutex<Option<mpsc::Receiver<Message>>>,
    errors: Mutex<Option<mpsc::Receiver<Error>>>,
    notifications: Mutex<Option<mpsc::UnboundedReceiver<Notification>>>,
    marked: Mutex<OffsetStash>,
    shutdown: watch::Sender<bool>,
    pump: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl KafkaAdapter {
    /// Create the consumer, subscribe to `topics` and start receiving.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        brokers: &[String],
        group: &str,
        topics: &[String],
        config: &ClientConfig,
    ) -> Result<Self> {
        config.validate()?;
        if topics.is_empty() {
            return Err(Error::InvalidConfig("No topics set".to_string()));
        }

        let (notifications_tx, notifications_rx) = if config.return_notifications {
            let (tx, rx) = mpsc::unbounded_channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let rebalance = Arc::new(RebalanceState::new(notifications_tx));

        let mut client_config = RdkafkaClientConfig::new();
        client_config
            .set("bootstrap.servers", brokers.join(","))
            .set("group.id", group)
            .set("auto.offset.reset", config.initial_offset.as_reset_policy())
            .set(
                "session.timeout.ms",
                config.session_timeout.as_millis().to_string(),
            )
            .set(
                "max.poll.interval.ms",
                config.max_processing_time.as_millis().to_string(),
            )
            .set("enable.auto.commit", "true")
            .set(
                "auto.commit.interval.ms",
                config.commit_interval.as_millis().to_string(),
            )
            .set("enable.auto.offset.store", "false")
            .set("enable.partition.eof", "false");
        if let Some(client_id) = &config.client_id {
            client_config.set("client.id", client_id);
        }
        for (key, value) in &config.properties {
            client_config.set(key, value);
        }

        let consumer: ProxyStreamConsumer = client_config
            .create_with_context(ProxyContext {
                state: Arc::clone(&rebalance),
            })
            .map_err(|e| Error::Consumer(format!("Failed to create consumer: {e}")))?;

        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topic_refs)
            .map_err(|e| Error::Consumer(format!("Failed to subscribe to topics: {e}")))?;

        let consumer = Arc::new(consumer);
        let (messages_tx, messages_rx) = mpsc::channel(config.channel_buffer_size);
        let (errors_tx, errors_rx) = if config.return_errors {
            let (tx, rx) = mpsc::channel(config.channel_buffer_size);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pump = tokio::spawn(pump(
            Arc::clone(&consumer),
            messages_tx,
            errors_tx,
            shutdown_rx,
        ));

        debug!("Consumer for group {group} subscribed to {topics:?}");

        Ok(Self {
            consumer,
            rebalance,
            messages: Mutex::new(Some(messages_rx)),
            errors: Mutex::new(errors_rx),
            notifications: Mutex::new(notifications_rx),
            marked: Mutex::new(OffsetStash::new()),
            shutdown: shutdown_tx,
            pump: Mutex::new(Some(pump)),
            closed: AtomicBool::new(false),
        })
    }

    /// Write the next offset to consume (`offset + 1`) into the offset store.
    fn store(&self, topic: &str, partition: i32, offset: i64, metadata: &str) -> Result<()> {
        let next = offset.checked_add(1).ok_or_else(|| {
            Error::Consumer(format!("Offset {offset} of {topic}/{partition} out of range"))
        })?;
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(topic, partition, Offset::Offset(next))?;
        if let Some(mut elem) = tpl.find_partition(topic, partition) {
            elem.set_metadata(metadata);
        }
        self.consumer.store_offsets(&tpl)?;
        Ok(())
    }

    fn update_marked(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
        metadata: &str,
        update: impl FnOnce(&mut OffsetStash) -> bool,
    ) -> Result<()> {
        let mut marked = lock(&self.marked);
        let previous = marked.get(topic, partition).cloned();
        if !update(&mut marked) {
            return Ok(());
        }
        if let Err(e) = self.store(topic, partition, offset, metadata) {
            marked.restore(topic, partition, previous);
            return Err(e);
        }
        Ok(())
    }

    /// Offsets marked or reset through this adapter.
    pub fn marked(&self) -> OffsetStash {
        lock(&self.marked).clone()
    }
}

#[async_trait]
impl Adapter for KafkaAdapter {
    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyClosed);
        }

        let _ = self.shutdown.send(true);
        let pump = lock(&self.pump).take();
        let pumped = match pump {
            Some(pump) => pump
                .await
                .map_err(|e| Error::Consumer(format!("Consumer task failed: {e}"))),
            None => Ok(()),
        };
        self.rebalance.close_notifications();

        let committed = self.commit_offsets();
        self.consumer.unsubscribe();
        pumped.and(committed)
    }

    fn commit_offsets(&self) -> Result<()> {
        match self.consumer.commit_consumer_state(CommitMode::Sync) {
            Ok(()) | Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn take_errors(&self) -> Option<mpsc::Receiver<Error>> {
        lock(&self.errors).take()
    }

    fn take_messages(&self) -> Option<mpsc::Receiver<Message>> {
        lock(&self.messages).take()
    }

    fn take_notifications(&self) -> Option<mpsc::UnboundedReceiver<Notification>> {
        lock(&self.notifications).take()
    }

    fn high_water_marks(&self) -> Result<HighWaterMarks> {
        let assignment = self.consumer.assignment()?;
        let mut marks = HighWaterMarks::new();
        for elem in assignment.elements() {
            let (_low, high) = self
                .consumer
                .get_watermark_offsets(elem.topic(), elem.partition())?;
            marks
                .entry(elem.topic().to_string())
                .or_default()
                .insert(elem.partition(), high);
        }
        Ok(marks)
    }

    fn mark_partition_offset(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
        metadata: &str,
    ) -> Result<()> {
        self.update_marked(topic, partition, offset, metadata, |marked| {
            marked.mark_partition_offset(topic, partition, offset, metadata)
        })
    }

    fn reset_partition_offset(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
        metadata: &str,
    ) -> Result<()> {
        self.update_marked(topic, partition, offset, metadata, |marked| {
            marked.reset_partition_offset(topic, partition, offset, metadata)
        })
    }

    fn subscriptions(&self) -> Result<TopicPartitions> {
        Ok(to_topic_partitions(&self.consumer.assignment()?))
    }
}
