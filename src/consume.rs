//! The `consume` command: join a group and print what it delivers.

use crate::config::{ConsumeOpts, ConsumerSettings};
use kafka_proxy_consumer::{
    Builder, Config, ConsumerProxy, Error, Message, Notification, NotificationKind,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Render a message as a single line of output.
pub fn format_message(message: &Message) -> String {
    let key = message
        .key
        .as_deref()
        .map(|k| String::from_utf8_lossy(k).into_owned());
    format!(
        "{}/{}@{} key={} {}",
        message.topic,
        message.partition,
        message.offset,
        key.as_deref().unwrap_or("-"),
        message.payload_lossy().unwrap_or_default()
    )
}

/// Build the proxy configuration for the `consume` command.
///
/// Each message is printed to stdout. The proxy is closed once
/// `max_messages` have been handled.
pub fn build_config(opts: &ConsumeOpts, settings: ConsumerSettings) -> Config {
    let mark_offsets = opts.mark_offsets;
    let max_messages = opts.max_messages;
    let handled = Arc::new(AtomicU64::new(0));

    let mut config = Config::new(settings.group, settings.brokers, settings.topics)
        .on_message(move |message, proxy: &ConsumerProxy| {
            println!("{}", format_message(&message));

            if mark_offsets {
                if let Some(consumer) = proxy.get() {
                    if let Err(e) = consumer.mark_offset(&message, "") {
                        tracing::warn!(
                            "Failed to mark {}/{}@{}: {}",
                            message.topic,
                            message.partition,
                            message.offset,
                            e
                        );
                    }
                }
            }

            let count = handled.fetch_add(1, Ordering::SeqCst) + 1;
            if max_messages == Some(count) {
                tracing::info!("Handled {} messages, closing consumer", count);
                let close = proxy.close();
                tokio::spawn(async move {
                    match close.await {
                        Ok(()) | Err(Error::AlreadyClosed) => {}
                        Err(e) => tracing::error!("Failed to close consumer: {}", e),
                    }
                });
            }
        })
        .on_error(|e| tracing::error!("Consumer error: {}", e))
        .on_notification(log_notification);

    if let Some(client_config) = settings.client_config {
        config = config.with_client_config(client_config);
    }
    config
}

fn log_notification(notification: Notification) {
    match notification.kind {
        NotificationKind::RebalanceStart => {
            tracing::info!("Rebalance started, releasing {:?}", notification.released)
        }
        NotificationKind::RebalanceOk => {
            tracing::info!(
                "Rebalance finished, claimed {:?}, now consuming {:?}",
                notification.claimed,
                notification.current
            )
        }
        NotificationKind::RebalanceError => {
            tracing::warn!("Rebalance failed, still consuming {:?}", notification.current)
        }
    }
}

/// Start the proxy and wait until it closes, on a signal or after
/// `max_messages`.
pub async fn run_consume(builder: Builder, log: bool) -> anyhow::Result<()> {
    let proxy = builder.build()?;
    if log {
        proxy.enable_logging();
    }

    tracing::info!("Joined consumer group {}", proxy.group());
    proxy.wait_closed().await;
    tracing::info!("Consumer group {} closed", proxy.group());
    Ok(())
}

pub async fn consume(opts: ConsumeOpts) -> anyhow::Result<()> {
    let settings = opts.resolve()?;
    let config = build_config(&opts, settings);
    run_consume(ConsumerProxy::builder(config), opts.log).await
}
