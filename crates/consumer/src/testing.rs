use crate::adapter::{Adapter, HighWaterMarks};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::lock;
use crate::message::{Message, Notification, TopicPartitions};
use crate::offsets::OffsetStash;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Adapter whose channels are fed by the test.
///
/// Closing it ends all channels, like a real consumer leaving its group.
pub struct MockAdapter {
    messages_tx: Mutex<Option<mpsc::Sender<Message>>>,
    messages_rx: Mutex<Option<mpsc::Receiver<Message>>>,
    errors_tx: Mutex<Option<mpsc::Sender<Error>>>,
    errors_rx: Mutex<Option<mpsc::Receiver<Error>>>,
    notifications_tx: Mutex<Option<mpsc::UnboundedSender<Notification>>>,
    notifications_rx: Mutex<Option<mpsc::UnboundedReceiver<Notification>>>,
    close_failure: Mutex<Option<String>>,
    close_calls: AtomicUsize,
    closed: AtomicBool,
    commits: AtomicUsize,
    marked: Mutex<OffsetStash>,
    subscriptions: Mutex<TopicPartitions>,
    high_water_marks: Mutex<HighWaterMarks>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::with_buffer(256)
    }

    pub fn with_buffer(buffer_size: usize) -> Self {
        let (messages_tx, messages_rx) = mpsc::channel(buffer_size);
        let (errors_tx, errors_rx) = mpsc::channel(buffer_size);
        let (notifications_tx, notifications_rx) = mpsc::unbounded_channel();
        Self {
            messages_tx: Mutex::new(Some(messages_tx)),
            messages_rx: Mutex::new(Some(messages_rx)),
            errors_tx: Mutex::new(Some(errors_tx)),
            errors_rx: Mutex::new(Some(errors_rx)),
            notifications_tx: Mutex::new(Some(notifications_tx)),
            notifications_rx: Mutex::new(Some(notifications_rx)),
            close_failure: Mutex::new(None),
            close_calls: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            commits: AtomicUsize::new(0),
            marked: Mutex::new(OffsetStash::new()),
            subscriptions: Mutex::new(TopicPartitions::new()),
            high_water_marks: Mutex::new(HighWaterMarks::new()),
        }
    }

    /// Connector that always hands out this adapter.
    pub fn connector(
        self: &Arc<Self>,
    ) -> impl Fn(&[String], &str, &[String], &ClientConfig) -> Result<Option<Arc<dyn Adapter>>>
           + Send
           + Sync
           + 'static {
        let adapter = Arc::clone(self);
        move |_: &[String], _: &str, _: &[String], _: &ClientConfig| {
            let adapter: Arc<dyn Adapter> = adapter.clone();
            Ok(Some(adapter))
        }
    }

    /// Returns false once the adapter is closed.
    pub async fn send_message(&self, message: Message) -> bool {
        let tx = lock(&self.messages_tx).clone();
        match tx {
            Some(tx) => tx.send(message).await.is_ok(),
            None => false,
        }
    }

    pub async fn send_error(&self, error: Error) -> bool {
        let tx = lock(&self.errors_tx).clone();
        match tx {
            Some(tx) => tx.send(error).await.is_ok(),
            None => false,
        }
    }

    pub fn send_notification(&self, notification: Notification) -> bool {
        match lock(&self.notifications_tx).as_ref() {
            Some(tx) => tx.send(notification).is_ok(),
            None => false,
        }
    }

    /// Make the next close fail with `reason`, leaving the channels open.
    pub fn fail_next_close(&self, reason: impl Into<String>) {
        *lock(&self.close_failure) = Some(reason.into());
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn marked(&self) -> OffsetStash {
        lock(&self.marked).clone()
    }

    pub fn set_subscriptions(&self, subscriptions: TopicPartitions) {
        *lock(&self.subscriptions) = subscriptions;
    }

    pub fn set_high_water_mark(&self, topic: &str, partition: i32, offset: i64) {
        lock(&self.high_water_marks)
            .entry(topic.to_string())
            .or_default()
            .insert(partition, offset);
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = lock(&self.close_failure).take() {
            return Err(Error::Consumer(reason));
        }
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyClosed);
        }

        lock(&self.messages_tx).take();
        lock(&self.errors_tx).take();
        lock(&self.notifications_tx).take();
        Ok(())
    }

    fn commit_offsets(&self) -> Result<()> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn take_errors(&self) -> Option<mpsc::Receiver<Error>> {
        lock(&self.errors_rx).take()
    }

    fn take_messages(&self) -> Option<mpsc::Receiver<Message>> {
        lock(&self.messages_rx).take()
    }

    fn take_notifications(&self) -> Option<mpsc::UnboundedReceiver<Notification>> {
        lock(&self.notifications_rx).take()
    }

    fn high_water_marks(&self) -> Result<HighWaterMarks> {
        Ok(lock(&self.high_water_marks).clone())
    }

    fn mark_partition_offset(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
        metadata: &str,
    ) -> Result<()> {
        lock(&self.marked).mark_partition_offset(topic, partition, offset, metadata);
        Ok(())
    }

    fn reset_partition_offset(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
        metadata: &str,
    ) -> Result<()> {
        lock(&self.marked).reset_partition_offset(topic, partition, offset, metadata);
        Ok(())
    }

    fn subscriptions(&self) -> Result<TopicPartitions> {
        Ok(lock(&self.subscriptions).clone())
    }
}
