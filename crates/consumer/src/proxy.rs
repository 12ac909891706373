use crate::adapter::{Adapter, Connector};
use crate::config::{ClientConfig, Config, ErrorHandler, MessageHandler, NotificationHandler};
use crate::error::{Error, Result};
use crate::kafka;
use crate::lock;
use crate::message::{Message, Notification};
use crate::signal::ShutdownSignals;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Lifecycle of a [`ConsumerProxy`]. There is no way back to `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    Open,
    Closing,
    Closed,
}

struct Inner {
    group: String,
    adapter: Option<Arc<dyn Adapter>>,
    state: watch::Sender<ProxyState>,
    logging: AtomicBool,
    forwarders: Mutex<Vec<JoinHandle<()>>>,
    signal_task: Mutex<Option<JoinHandle<()>>>,
}

/// Consumer-group member that forwards messages, errors and rebalance
/// notifications to callbacks and closes itself on SIGINT, SIGTERM or SIGQUIT.
///
/// Clones share the same consumer.
#[derive(Clone)]
pub struct ConsumerProxy {
    inner: Arc<Inner>,
}

/// Builds a [`ConsumerProxy`] with a custom [`Connector`].
pub struct Builder {
    config: Config,
    connector: Connector,
}

impl Builder {
    /// Replace the rdkafka connector, e.g. with a test double.
    pub fn connector<F>(mut self, connector: F) -> Self
    where
        F: Fn(&[String], &str, &[String], &ClientConfig) -> Result<Option<Arc<dyn Adapter>>>
            + Send
            + Sync
            + 'static,
    {
        self.connector = Arc::new(connector);
        self
    }

    /// Validate the configuration, connect, and start forwarding.
    ///
    /// Must be called from within a Tokio runtime unless the connector
    /// leaves the proxy detached.
    pub fn build(self) -> Result<ConsumerProxy> {
        let Config {
            consumer_group,
            brokers,
            topics,
            message_handler,
            error_handler,
            notification_handler,
            client_config,
        } = self.config;

        if brokers.is_empty() {
            return Err(Error::BrokersNotSet("No Kafka brokers set".to_string()));
        }
        if consumer_group.trim().is_empty() {
            return Err(Error::InvalidConfig("No consumer group set".to_string()));
        }
        let message_handler = message_handler.ok_or(Error::MessageHandlerNotSet)?;
        let client_config = client_config.unwrap_or_else(ClientConfig::proxy_default);
        client_config.validate()?;

        let adapter = (self.connector)(&brokers, &consumer_group, &topics, &client_config)
            .map_err(|e| Error::Connection {
                group: consumer_group.clone(),
                reason: e.to_string(),
            })?;

        let (state, _) = watch::channel(ProxyState::Open);
        let proxy = ConsumerProxy {
            inner: Arc::new(Inner {
                group: consumer_group,
                adapter: adapter.clone(),
                state,
                logging: AtomicBool::new(false),
                forwarders: Mutex::new(Vec::new()),
                signal_task: Mutex::new(None),
            }),
        };

        // Detached proxies leave the adapter to the caller.
        let Some(adapter) = adapter else {
            debug!(group = %proxy.group(), "Consumer proxy created without adapter");
            return Ok(proxy);
        };

        let signals = match ShutdownSignals::install() {
            Ok(signals) => signals,
            Err(e) => {
                tokio::spawn(async move {
                    if let Err(e) = adapter.close().await {
                        warn!("Failed to close consumer: {e}");
                    }
                });
                return Err(e.into());
            }
        };

        proxy.start(
            adapter.as_ref(),
            signals,
            message_handler,
            error_handler,
            notification_handler,
        );
        debug!(group = %proxy.group(), ?topics, "Consumer proxy started");

        Ok(proxy)
    }
}

impl ConsumerProxy {
    /// Join the consumer group through rdkafka and start forwarding.
    pub fn new(config: Config) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: Config) -> Builder {
        Builder {
            config,
            connector: Arc::new(kafka::connect),
        }
    }

    /// Emit a tracing event for every forwarded item.
    ///
    /// While enabled, consumer errors are fatal: they are logged and the
    /// process exits instead of reaching the error handler.
    pub fn enable_logging(&self) {
        self.inner.logging.store(true, Ordering::SeqCst);
    }

    pub fn is_logging_enabled(&self) -> bool {
        self.inner.logging.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ProxyState::Closed
    }

    pub fn state(&self) -> ProxyState {
        *self.inner.state.borrow()
    }

    /// Resolves once the proxy has closed, whoever closed it.
    pub async fn wait_closed(&self) {
        let mut state = self.inner.state.subscribe();
        let _ = state.wait_for(|s| *s == ProxyState::Closed).await;
    }

    pub fn group(&self) -> &str {
        &self.inner.group
    }

    /// The underlying consumer, for offset management and introspection.
    ///
    /// `None` when the connector left the proxy detached.
    pub fn get(&self) -> Option<Arc<dyn Adapter>> {
        self.inner.adapter.clone()
    }

    /// Close the consumer in the background.
    ///
    /// Only the first call closes anything; every later call (including while
    /// the first is still running) resolves to [`Error::AlreadyClosed`].
    /// Dropping the handle does not cancel the close. A detached proxy closes
    /// immediately, without needing a Tokio runtime.
    pub fn close(&self) -> CloseHandle {
        let began = self.inner.state.send_if_modified(|state| {
            if *state == ProxyState::Open {
                *state = ProxyState::Closing;
                true
            } else {
                false
            }
        });
        if !began {
            return CloseHandle::ready(Err(Error::AlreadyClosed));
        }

        // Nothing to tear down, and no runtime is required.
        if self.inner.adapter.is_none() {
            self.inner.state.send_replace(ProxyState::Closed);
            return CloseHandle::ready(Ok(()));
        }

        let (tx, rx) = oneshot::channel();
        let proxy = self.clone();
        tokio::spawn(async move {
            let result = proxy.shutdown().await;
            let _ = tx.send(result);
        });
        CloseHandle { rx }
    }

    async fn shutdown(&self) -> Result<()> {
        if let Some(signal_task) = lock(&self.inner.signal_task).take() {
            signal_task.abort();
        }
        let forwarders = std::mem::take(&mut *lock(&self.inner.forwarders));

        let result = match &self.inner.adapter {
            Some(adapter) => adapter.close().await,
            None => Ok(()),
        };

        match &result {
            Ok(()) => {
                // Forwarders end once the adapter's channels are closed.
                for forwarder in forwarders {
                    if let Err(e) = forwarder.await {
                        if e.is_panic() {
                            warn!(group = %self.group(), "Forwarding task panicked: {e}");
                        }
                    }
                }
                if self.is_logging_enabled() {
                    info!(group = %self.group(), "Consumer closed");
                }
            }
            Err(e) => {
                for forwarder in &forwarders {
                    forwarder.abort();
                }
                if self.is_logging_enabled() {
                    error!(group = %self.group(), "Error closing consumer: {e}");
                }
            }
        }

        self.inner.state.send_replace(ProxyState::Closed);
        result
    }

    fn start(
        &self,
        adapter: &dyn Adapter,
        signals: ShutdownSignals,
        message_handler: MessageHandler,
        error_handler: Option<ErrorHandler>,
        notification_handler: Option<NotificationHandler>,
    ) {
        {
            let mut signal_task = lock(&self.inner.signal_task);
            *signal_task = Some(tokio::spawn(watch_signals(
                Arc::downgrade(&self.inner),
                signals,
            )));
        }

        let mut forwarders = Vec::new();
        if let Some(errors) = adapter.take_errors() {
            forwarders.push(self.forward_errors(errors, error_handler));
        }
        if let Some(messages) = adapter.take_messages() {
            forwarders.push(self.forward_messages(messages, message_handler));
        }
        if let Some(notifications) = adapter.take_notifications() {
            forwarders.push(self.forward_notifications(notifications, notification_handler));
        }
        *lock(&self.inner.forwarders) = forwarders;
    }

    fn forward_errors(
        &self,
        mut errors: mpsc::Receiver<Error>,
        handler: Option<ErrorHandler>,
    ) -> JoinHandle<()> {
        let proxy = self.clone();
        tokio::spawn(async move {
            while let Some(err) = errors.recv().await {
                if proxy.is_logging_enabled() {
                    error!(group = %proxy.group(), "Failed to read messages from topic: {err}");
                    std::process::exit(1);
                }
                if let Some(handler) = &handler {
                    handler(err);
                }
            }
            debug!(group = %proxy.group(), "Error channel closed");
        })
    }

    fn forward_messages(
        &self,
        mut messages: mpsc::Receiver<Message>,
        handler: MessageHandler,
    ) -> JoinHandle<()> {
        let proxy = self.clone();
        tokio::spawn(async move {
            while let Some(message) = messages.recv().await {
                if proxy.is_logging_enabled() {
                    info!(
                        topic = %message.topic,
                        partition = message.partition,
                        offset = message.offset,
                        "Message received"
                    );
                }
                handler(message, &proxy);
            }
            debug!(group = %proxy.group(), "Message channel closed");
        })
    }

    fn forward_notifications(
        &self,
        mut notifications: mpsc::UnboundedReceiver<Notification>,
        handler: Option<NotificationHandler>,
    ) -> JoinHandle<()> {
        let proxy = self.clone();
        tokio::spawn(async move {
            while let Some(notification) = notifications.recv().await {
                if proxy.is_logging_enabled() {
                    info!(
                        kind = ?notification.kind,
                        claimed = ?notification.claimed,
                        released = ?notification.released,
                        current = ?notification.current,
                        "Rebalanced"
                    );
                }
                if let Some(handler) = &handler {
                    handler(notification);
                }
            }
            debug!(group = %proxy.group(), "Notification channel closed");
        })
    }
}

/// Closes the proxy on the first shutdown signal.
async fn watch_signals(inner: Weak<Inner>, mut signals: ShutdownSignals) {
    let signal = signals.recv().await;
    let Some(inner) = inner.upgrade() else {
        return;
    };
    // Detach so the close below does not abort this task.
    lock(&inner.signal_task).take();

    let proxy = ConsumerProxy { inner };
    info!(group = %proxy.group(), "{signal} received, closing consumer");
    match proxy.close().await {
        Ok(()) => info!(group = %proxy.group(), "Consumer closed"),
        Err(e) => warn!(group = %proxy.group(), "Failed to close consumer: {e}"),
    }
}

impl fmt::Debug for ConsumerProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerProxy")
            .field("group", &self.inner.group)
            .field("state", &self.state())
            .field("logging", &self.is_logging_enabled())
            .field("detached", &self.inner.adapter.is_none())
            .finish()
    }
}

/// Result of [`ConsumerProxy::close`], delivered through a single-slot
/// channel.
pub struct CloseHandle {
    rx: oneshot::Receiver<Result<()>>,
}

impl CloseHandle {
    fn ready(result: Result<()>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }
}

impl Future for CloseHandle {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(Error::CloseInterrupted)))
    }
}
