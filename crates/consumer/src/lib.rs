//! Kafka consumer-group proxy.
//!
//! Joins a consumer group through an [`Adapter`] (librdkafka by default) and
//! forwards what the group delivers to plain callbacks:
//!
//! - Messages: every consumed message, with the proxy that received it
//! - Errors: consumer errors while running
//! - Notifications: consumer-group rebalances
//!
//! The proxy closes itself on SIGINT, SIGTERM or SIGQUIT. Offset marking,
//! high-water marks and subscriptions are reached through [`ConsumerProxy::get`].
//!
//! ```no_run
//! use kafka_proxy_consumer::{Config, ConsumerProxy};
//!
//! # async fn run() -> kafka_proxy_consumer::Result<()> {
//! let config = Config::new("my-group", ["localhost:9092"], ["events"]).on_message(
//!     |message, proxy: &ConsumerProxy| {
//!         println!("{}:{} @ {}", message.topic, message.partition, message.offset);
//!         if let Some(consumer) = proxy.get() {
//!             let _ = consumer.mark_offset(&message, "");
//!         }
//!     },
//! );
//!
//! let proxy = ConsumerProxy::new(config)?;
//! proxy.wait_closed().await;
//! # Ok(())
//! # }
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod adapter;
pub mod config;
pub mod error;

/// librdkafka-backed adapter
pub mod kafka;
pub mod message;
pub mod offsets;
pub mod proxy;
mod signal;

/// In-memory adapter for tests
pub mod testing;

pub use adapter::{Adapter, Connector, HighWaterMarks};
pub use config::{
    ClientConfig, Config, ErrorHandler, InitialOffset, MessageHandler, NotificationHandler,
};
pub use error::{Error, Result};
pub use kafka::KafkaAdapter;
pub use message::{Message, Notification, NotificationKind, PartitionConsumer, TopicPartitions};
pub use offsets::{OffsetInfo, OffsetStash};
pub use proxy::{Builder, CloseHandle, ConsumerProxy, ProxyState};

/// Lock a mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
