//! Integration tests for the redpanda binding against a real Kafka
//! instance.
//!
//! These tests use testcontainers to spin up Kafka and validate the full
//! correlation round trip over real topics:
//! - request published by the client, consumed by the server's group
//! - explicit reply published by the server, consumed by the client's group
//! - expiration when nothing answers
//!
//! # Running These Tests
//!
//! They are `#[ignore]`d by default because they:
//! - Require Docker to be running (for testcontainers)
//! - Take 15-60 seconds per test to spin up Kafka
//! - Can be flaky due to Kafka's distributed nature and timing
//!
//! To run explicitly:
//! ```bash
//! cargo test -p reqbus-redpanda --test integration_tests -- --ignored
//! ```
//!
//! # Panics
//!
//! These tests use `expect()` and `unwrap()` for setup failures, which is
//! acceptable in test code.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use reqbus_core::{Client, Message, RequestCallback, ResponseCallback, Server};
use reqbus_redpanda::{Dispatch, RedpandaConsumer, RedpandaTransport};
use reqbus_runtime::supervised::{BackoffPolicy, SupervisedTask};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

const QUERY: u32 = 1;
const ANSWER: u32 = 2;

/// A valid envelope nobody is waiting for; used to create topics and warm
/// the brokers up. The server skips its unregistered type, the client logs
/// `NoRequestInPool` and moves on.
fn warmup_envelope() -> Vec<u8> {
    Message::with_request_id(999, "warmup", "warmup", &serde_json::json!({}))
        .expect("warmup envelope should encode")
        .encode()
        .expect("warmup envelope should encode")
}

/// Publish warmup envelopes until the broker accepts them, creating the
/// topic as a side effect.
async fn wait_for_topic(brokers: &str, topic: &str) {
    let max_attempts = 60;
    for attempt in 1..=max_attempts {
        if let Ok(transport) = RedpandaTransport::builder()
            .brokers(brokers)
            .topic(topic)
            .build()
        {
            use reqbus_core::Transport;
            if transport.send("warmup", warmup_envelope()).await.is_ok() {
                // Give the cluster time to propagate topic metadata.
                tokio::time::sleep(Duration::from_secs(2)).await;
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(
            attempt != max_attempts,
            "topic {topic} failed to become ready after {max_attempts} attempts"
        );
    }
}

struct KafkaHarness {
    client: Arc<Client>,
    server: Arc<Server>,
    request_consumer: SupervisedTask,
    response_consumer: SupervisedTask,
}

async fn start_harness(brokers: &str, call_timeout: Duration) -> KafkaHarness {
    let request_topic = "reqbus-requests";
    let response_topic = "reqbus-responses";
    wait_for_topic(brokers, request_topic).await;
    wait_for_topic(brokers, response_topic).await;

    let client_transport = Arc::new(
        RedpandaTransport::builder()
            .brokers(brokers)
            .topic(request_topic)
            .producer_acks("all")
            .build()
            .expect("client transport"),
    );
    let server_transport = Arc::new(
        RedpandaTransport::builder()
            .brokers(brokers)
            .topic(response_topic)
            .producer_acks("all")
            .build()
            .expect("server transport"),
    );

    let client = Arc::new(
        Client::builder(client_transport)
            .call_timeout(call_timeout)
            .build()
            .expect("client"),
    );
    let server = Arc::new(
        Server::builder(server_transport)
            .call_timeout(call_timeout)
            .build()
            .expect("server"),
    );
    client.start();
    server.start();

    let server_dispatch: Dispatch = {
        let server = Arc::clone(&server);
        Arc::new(move |bytes| {
            let server = Arc::clone(&server);
            Box::pin(async move { server.request_handler(&bytes).await })
        })
    };
    let request_consumer = {
        let consumer = Arc::new(
            RedpandaConsumer::builder()
                .brokers(brokers)
                .group("reqbus-it-server")
                .topics([request_topic])
                .auto_offset_reset("earliest")
                .build()
                .expect("request consumer"),
        );
        // The factory is re-invoked on failure; each run re-subscribes.
        SupervisedTask::spawn("request-consumer", BackoffPolicy::default(), move || {
            let consumer = Arc::clone(&consumer);
            let dispatch = Arc::clone(&server_dispatch);
            async move { consumer.run(dispatch).await }
        })
    };

    let client_dispatch: Dispatch = {
        let client = Arc::clone(&client);
        Arc::new(move |bytes| {
            let client = Arc::clone(&client);
            Box::pin(async move { client.response_handler(&bytes).await })
        })
    };
    let response_consumer = {
        let consumer = Arc::new(
            RedpandaConsumer::builder()
                .brokers(brokers)
                .group("reqbus-it-client")
                .topics([response_topic])
                .auto_offset_reset("earliest")
                .build()
                .expect("response consumer"),
        );
        SupervisedTask::spawn("response-consumer", BackoffPolicy::default(), move || {
            let consumer = Arc::clone(&consumer);
            let dispatch = Arc::clone(&client_dispatch);
            async move { consumer.run(dispatch).await }
        })
    };

    // Let both consumer groups join and get partitions assigned.
    tokio::time::sleep(Duration::from_secs(5)).await;

    KafkaHarness {
        client,
        server,
        request_consumer,
        response_consumer,
    }
}

#[tokio::test(flavor = "multi_thread")]
#[ignore]
async fn call_response_round_trip_over_kafka() {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");
    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    let brokers = format!("{host}:{port}");

    let harness = start_harness(&brokers, Duration::from_secs(30)).await;

    // Echo handler: replies to every query with the query body.
    let handler: RequestCallback = {
        let server = Arc::clone(&harness.server);
        Arc::new(move |request: Message| {
            let server = Arc::clone(&server);
            Box::pin(async move {
                let body = request
                    .body
                    .as_value()
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("body missing"))?;
                server
                    .response(Message::reply(&request, ANSWER, &body)?)
                    .await?;
                Ok(())
            })
        })
    };
    harness.server.register_type(QUERY, handler, None);

    let (resolved_tx, mut resolved_rx) = tokio::sync::mpsc::unbounded_channel();
    let callback: ResponseCallback = Arc::new(move |_request, response| {
        let resolved_tx = resolved_tx.clone();
        Box::pin(async move {
            let echo = response
                .body
                .as_value()
                .and_then(|v| v.get("q"))
                .cloned();
            resolved_tx.send(echo)?;
            Ok(())
        })
    });

    let msg = Message::new(QUERY, "order-42", &serde_json::json!({"q": 7}))
        .expect("message")
        .require_response();
    harness.client.call(msg, Some(callback)).await.expect("call");

    let echo = tokio::time::timeout(Duration::from_secs(60), resolved_rx.recv())
        .await
        .expect("response should arrive before the timeout")
        .expect("callback should have fired");
    assert_eq!(echo, Some(serde_json::json!(7)));
    assert_eq!(harness.client.pending(), 0);
    assert_eq!(harness.server.pending(), 0);

    harness.client.close();
    harness.server.close();
    harness.request_consumer.shutdown().await;
    harness.response_consumer.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
#[ignore]
async fn unanswered_call_expires_over_kafka() {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");
    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    let brokers = format!("{host}:{port}");

    // Short timeout; no handler registered, so the server skips the
    // request and nothing ever answers.
    let harness = start_harness(&brokers, Duration::from_secs(2)).await;

    let expired = Arc::new(AtomicUsize::new(0));
    let expired_clone = Arc::clone(&expired);
    harness
        .client
        .set_expiration_callback(Arc::new(move |message: Message| {
            let expired = Arc::clone(&expired_clone);
            Box::pin(async move {
                assert_eq!(message.key, "order-43");
                expired.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }));

    let resolved = Arc::new(AtomicUsize::new(0));
    let resolved_clone = Arc::clone(&resolved);
    let callback: ResponseCallback = Arc::new(move |_request, _response| {
        let resolved = Arc::clone(&resolved_clone);
        Box::pin(async move {
            resolved.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    });

    let msg = Message::new(QUERY, "order-43", &serde_json::json!({"q": 9}))
        .expect("message")
        .require_response();
    harness.client.call(msg, Some(callback)).await.expect("call");
    assert_eq!(harness.client.pending(), 1);

    // ttl 2s plus a sweep tick, with generous margin for a busy CI host.
    tokio::time::sleep(Duration::from_secs(8)).await;

    assert_eq!(expired.load(Ordering::SeqCst), 1);
    assert_eq!(resolved.load(Ordering::SeqCst), 0);
    assert_eq!(harness.client.pending(), 0);

    harness.client.close();
    harness.server.close();
    harness.request_consumer.shutdown().await;
    harness.response_consumer.shutdown().await;
}
