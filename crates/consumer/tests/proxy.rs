//! Lifecycle and forwarding tests for `ConsumerProxy`, run against the
//! in-memory adapter so no broker is needed.

use kafka_proxy_consumer::testing::MockAdapter;
use kafka_proxy_consumer::{
    ClientConfig, Config, ConsumerProxy, Error, InitialOffset, Message, Notification,
    NotificationKind, ProxyState,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;

fn config() -> Config {
    Config::new("g1", ["host:9092"], ["t1"]).on_message(|_, _| {})
}

fn build_with_mock(config: Config) -> (ConsumerProxy, Arc<MockAdapter>) {
    let adapter = Arc::new(MockAdapter::new());
    let proxy = ConsumerProxy::builder(config)
        .connector(adapter.connector())
        .build()
        .unwrap();
    (proxy, adapter)
}

// ============================================================================
// Construction
// ============================================================================

#[tokio::test]
async fn test_empty_brokers_fail_without_connecting() {
    let connected = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&connected);

    let config = Config::new("g1", Vec::<String>::new(), ["t1"]).on_message(|_, _| {});
    let result = ConsumerProxy::builder(config)
        .connector(move |_: &[String], _: &str, _: &[String], _: &ClientConfig| {
            flag.store(true, Ordering::SeqCst);
            Ok(None)
        })
        .build();

    assert!(matches!(result, Err(Error::BrokersNotSet(_))));
    assert!(!connected.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_failing_connector_reports_group() {
    let result = ConsumerProxy::builder(config())
        .connector(|_: &[String], _: &str, _: &[String], _: &ClientConfig| {
            Err(Error::Consumer("broker unreachable".to_string()))
        })
        .build();

    let err = result.unwrap_err();
    assert!(matches!(err, Error::Connection { .. }));
    let text = err.to_string();
    assert!(text.contains("g1"), "unexpected error text: {text}");
    assert!(text.contains("broker unreachable"), "unexpected error text: {text}");
}

#[tokio::test]
async fn test_missing_message_handler_is_rejected() {
    let connected = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&connected);

    let result = ConsumerProxy::builder(Config::new("g1", ["host:9092"], ["t1"]))
        .connector(move |_: &[String], _: &str, _: &[String], _: &ClientConfig| {
            flag.store(true, Ordering::SeqCst);
            Ok(None)
        })
        .build();

    assert!(matches!(result, Err(Error::MessageHandlerNotSet)));
    assert!(!connected.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_empty_group_is_rejected() {
    let config = Config::new("", ["host:9092"], ["t1"]).on_message(|_, _| {});
    let result = ConsumerProxy::builder(config)
        .connector(|_: &[String], _: &str, _: &[String], _: &ClientConfig| Ok(None))
        .build();

    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}

#[tokio::test]
async fn test_connector_receives_request() {
    let seen = Arc::new(Mutex::new(None));
    let record = Arc::clone(&seen);

    let custom = ClientConfig {
        initial_offset: InitialOffset::Oldest,
        max_processing_time: Duration::from_secs(42),
        session_timeout: Duration::from_secs(30),
        ..ClientConfig::default()
    };

    let proxy = ConsumerProxy::builder(config().with_client_config(custom.clone()))
        .connector(
            move |brokers: &[String], group: &str, topics: &[String], config: &ClientConfig| {
                *record.lock().unwrap() = Some((
                    brokers.to_vec(),
                    group.to_string(),
                    topics.to_vec(),
                    config.clone(),
                ));
                Ok(None)
            },
        )
        .build()
        .unwrap();

    let (brokers, group, topics, config) = seen.lock().unwrap().take().unwrap();
    assert_eq!(brokers, vec!["host:9092".to_string()]);
    assert_eq!(group, "g1");
    assert_eq!(topics, vec!["t1".to_string()]);
    // A custom configuration is used as-is, without the proxy defaults.
    assert_eq!(config, custom);
    assert!(!config.return_errors);
    assert_eq!(proxy.group(), "g1");
}

#[tokio::test]
async fn test_default_client_config_is_applied() {
    let seen = Arc::new(Mutex::new(None));
    let record = Arc::clone(&seen);

    ConsumerProxy::builder(config())
        .connector(move |_: &[String], _: &str, _: &[String], config: &ClientConfig| {
            *record.lock().unwrap() = Some(config.clone());
            Ok(None)
        })
        .build()
        .unwrap();

    let config = seen.lock().unwrap().take().unwrap();
    assert_eq!(config, ClientConfig::proxy_default());
    assert_eq!(config.max_processing_time, Duration::from_secs(10));
    assert!(config.return_errors);
    assert!(config.return_notifications);
}

// ============================================================================
// Close
// ============================================================================

#[tokio::test]
async fn test_open_then_close() {
    let (proxy, adapter) = build_with_mock(config());
    assert!(!proxy.is_closed());
    assert_eq!(proxy.state(), ProxyState::Open);

    proxy.close().await.unwrap();

    assert!(proxy.is_closed());
    assert_eq!(adapter.close_calls(), 1);
}

#[tokio::test]
async fn test_second_close_reports_already_closed() {
    let (proxy, adapter) = build_with_mock(config());
    proxy.close().await.unwrap();

    let second = proxy.close().await;
    assert!(matches!(second, Err(Error::AlreadyClosed)));
    assert_eq!(adapter.close_calls(), 1);
}

#[tokio::test]
async fn test_close_after_close_is_ready_without_polling_adapter() {
    let (proxy, adapter) = build_with_mock(config());
    proxy.close().await.unwrap();

    let mut second = tokio_test::task::spawn(proxy.close());
    let result = tokio_test::assert_ready!(second.poll());
    assert!(matches!(result, Err(Error::AlreadyClosed)));
    assert_eq!(adapter.close_calls(), 1);
}

#[tokio::test]
async fn test_concurrent_closes_close_once() {
    let (proxy, adapter) = build_with_mock(config());

    let first = proxy.close();
    let second = proxy.clone().close();
    assert_eq!(proxy.state(), ProxyState::Closing);

    assert!(matches!(second.await, Err(Error::AlreadyClosed)));
    first.await.unwrap();
    assert_eq!(adapter.close_calls(), 1);
    assert!(proxy.is_closed());
}

#[tokio::test]
async fn test_failed_close_still_closes_proxy() {
    let (proxy, adapter) = build_with_mock(config());
    adapter.fail_next_close("leave group failed");

    let result = proxy.close().await;
    match result {
        Err(Error::Consumer(reason)) => assert_eq!(reason, "leave group failed"),
        other => panic!("unexpected close result: {other:?}"),
    }
    assert!(proxy.is_closed());

    assert!(matches!(proxy.close().await, Err(Error::AlreadyClosed)));
    assert_eq!(adapter.close_calls(), 1);
}

#[tokio::test]
async fn test_wait_closed_resolves_after_close() {
    let (proxy, _adapter) = build_with_mock(config());
    let waiter = {
        let proxy = proxy.clone();
        tokio::spawn(async move { proxy.wait_closed().await })
    };

    proxy.close().await.unwrap();
    timeout(Duration::from_secs(5), waiter)
        .await
        .expect("wait_closed did not resolve")
        .unwrap();
}

#[tokio::test]
async fn test_detached_proxy() {
    let proxy = ConsumerProxy::builder(config())
        .connector(|_: &[String], _: &str, _: &[String], _: &ClientConfig| Ok(None))
        .build()
        .unwrap();

    assert!(proxy.get().is_none());
    assert!(!proxy.is_closed());
    proxy.close().await.unwrap();
    assert!(proxy.is_closed());
}

#[test]
fn test_detached_proxy_closes_without_runtime() {
    let proxy = ConsumerProxy::builder(config())
        .connector(|_: &[String], _: &str, _: &[String], _: &ClientConfig| Ok(None))
        .build()
        .unwrap();

    let mut close = tokio_test::task::spawn(proxy.close());
    assert!(proxy.is_closed());
    let result = tokio_test::assert_ready!(close.poll());
    assert!(result.is_ok());

    let mut second = tokio_test::task::spawn(proxy.close());
    let result = tokio_test::assert_ready!(second.poll());
    assert!(matches!(result, Err(Error::AlreadyClosed)));
}

#[tokio::test]
async fn test_session_above_processing_time_fails_before_connecting() {
    let called = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&called);
    let client = ClientConfig {
        session_timeout: Duration::from_secs(30),
        max_processing_time: Duration::from_secs(10),
        ..ClientConfig::proxy_default()
    };

    let result = ConsumerProxy::builder(config().with_client_config(client))
        .connector(move |_: &[String], _: &str, _: &[String], _: &ClientConfig| {
            flag.store(true, Ordering::SeqCst);
            Ok(None)
        })
        .build();

    assert!(matches!(result, Err(Error::InvalidConfig(_))));
    assert!(!called.load(Ordering::SeqCst));
}

// ============================================================================
// Forwarding
// ============================================================================

#[tokio::test]
async fn test_messages_forwarded_in_order() {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);

    let config = Config::new("g1", ["host:9092"], ["t1"]).on_message(
        move |message: Message, proxy: &ConsumerProxy| {
            sink.lock()
                .unwrap()
                .push((message.offset, proxy.group().to_string()));
        },
    );
    let (proxy, adapter) = build_with_mock(config);

    for offset in 0..5 {
        assert!(adapter.send_message(Message::new("t1", 0, offset, b"x")).await);
    }
    proxy.close().await.unwrap();

    let received = received.lock().unwrap();
    let offsets: Vec<i64> = received.iter().map(|(offset, _)| *offset).collect();
    assert_eq!(offsets, vec![0, 1, 2, 3, 4]);
    assert!(received.iter().all(|(_, group)| group == "g1"));
}

#[tokio::test]
async fn test_handler_marks_offsets_through_proxy() {
    let config = Config::new("g1", ["host:9092"], ["t1"]).on_message(
        |message: Message, proxy: &ConsumerProxy| {
            let consumer = proxy.get().unwrap();
            consumer.mark_offset(&message, "done").unwrap();
        },
    );
    let (proxy, adapter) = build_with_mock(config);

    adapter.send_message(Message::new("t1", 0, 7, b"a")).await;
    adapter.send_message(Message::new("t1", 1, 3, b"b")).await;
    adapter.send_message(Message::new("t1", 0, 8, b"c")).await;
    proxy.close().await.unwrap();

    let marked = adapter.marked();
    assert_eq!(marked.get("t1", 0).unwrap().offset, 8);
    assert_eq!(marked.get("t1", 1).unwrap().offset, 3);
    assert_eq!(marked.get("t1", 0).unwrap().metadata, "done");
}

#[tokio::test]
async fn test_errors_reach_handler_once() {
    let errors = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&errors);

    let config = config().on_error(move |err| {
        assert!(matches!(err, Error::Consumer(_)));
        count.fetch_add(1, Ordering::SeqCst);
    });
    let (proxy, adapter) = build_with_mock(config);

    adapter.send_error(Error::Consumer("fetch failed".to_string())).await;
    adapter.send_error(Error::Consumer("fetch failed again".to_string())).await;
    proxy.close().await.unwrap();

    assert_eq!(errors.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_errors_without_handler_are_dropped() {
    let (proxy, adapter) = build_with_mock(config());

    assert!(adapter.send_error(Error::Consumer("ignored".to_string())).await);
    proxy.close().await.unwrap();
    assert!(proxy.is_closed());
}

#[tokio::test]
async fn test_notifications_reach_handler() {
    let kinds = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&kinds);

    let config = config().on_notification(move |notification| {
        sink.lock().unwrap().push(notification.kind);
    });
    let (proxy, adapter) = build_with_mock(config);

    let mut claimed = Notification::new(NotificationKind::RebalanceOk);
    claimed.claimed.insert("t1".to_string(), vec![0, 1]);
    adapter.send_notification(Notification::new(NotificationKind::RebalanceStart));
    adapter.send_notification(claimed);
    proxy.close().await.unwrap();

    assert_eq!(
        *kinds.lock().unwrap(),
        vec![NotificationKind::RebalanceStart, NotificationKind::RebalanceOk]
    );
}

#[tokio::test]
async fn test_close_from_message_handler() {
    let config = Config::new("g1", ["host:9092"], ["t1"]).on_message(
        |_: Message, proxy: &ConsumerProxy| {
            let _ = proxy.close();
        },
    );
    let (proxy, adapter) = build_with_mock(config);

    adapter.send_message(Message::new("t1", 0, 0, b"stop")).await;
    timeout(Duration::from_secs(5), proxy.wait_closed())
        .await
        .expect("proxy did not close");

    assert!(!adapter.send_message(Message::new("t1", 0, 1, b"late")).await);
    assert_eq!(adapter.close_calls(), 1);
}

#[tokio::test]
async fn test_passthrough_to_adapter() {
    let (proxy, adapter) = build_with_mock(config());
    adapter.set_high_water_mark("t1", 0, 120);
    adapter.set_subscriptions([("t1".to_string(), vec![0])].into_iter().collect());

    let consumer = proxy.get().unwrap();
    assert_eq!(consumer.high_water_marks().unwrap()["t1"][&0], 120);
    assert_eq!(consumer.subscriptions().unwrap()["t1"], vec![0]);
    consumer.commit_offsets().unwrap();
    assert_eq!(adapter.commits(), 1);

    proxy.close().await.unwrap();
}

#[tokio::test]
async fn test_enable_logging_sets_flag() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("kafka_proxy_consumer=debug")
        .with_test_writer()
        .try_init();

    let (proxy, adapter) = build_with_mock(config());
    assert!(!proxy.is_logging_enabled());
    proxy.enable_logging();
    assert!(proxy.is_logging_enabled());

    adapter.send_message(Message::new("t1", 0, 0, b"logged")).await;
    proxy.close().await.unwrap();
}
