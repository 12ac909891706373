//! Kafka Proxy
//!
//! Command-line front end for [`kafka_proxy_consumer`]: joins a Kafka
//! consumer group and prints every message it is handed.
//!
//! # CLI Usage
//!
//! ```bash
//! # Print messages of two topics, starting from the oldest offset
//! kafka-proxy consume --brokers localhost:9092 --group my-group \
//!   --topics orders,payments --from-beginning
//!
//! # Mark offsets as processed and stop after 100 messages
//! kafka-proxy consume --config-file kafka-proxy.toml --mark-offsets --max-messages 100
//! ```

pub mod config;
pub mod consume;

pub use config::{parse_duration, ConsumeOpts, ConsumerSettings, FileConfig};
pub use consume::{build_config, consume, format_message, run_consume};
