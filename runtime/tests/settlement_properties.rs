//! Property tests: every delivered message ends in exactly one terminal
//! settlement, whatever the mix of routes, failures and concurrency.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use notifier_core::{HandlerError, HandlerRegistry, Message, Settlement, handler_fn};
use notifier_runtime::{BackoffPolicy, ConnectionManager, Consumer, DispatchPolicy, drain_channel};
use notifier_testing::{InMemoryBroker, TestMessage, strategies};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const EXCHANGE: &str = "post_fanout_exchange";
const QUEUE: &str = "notification_fanout_queue";

/// Settlements a message must see, in order.
fn expected(pattern: Option<&str>, failures: u32, max_attempts: u32) -> Vec<Settlement> {
    if pattern != Some("post.created") {
        return vec![Settlement::Reject { requeue: false }];
    }
    let retries = failures.min(max_attempts - 1);
    let mut settlements = vec![Settlement::Nack { requeue: true }; retries as usize];
    settlements.push(if failures < max_attempts {
        Settlement::Ack
    } else {
        Settlement::Reject { requeue: false }
    });
    settlements
}

async fn run_scenario(messages: Vec<(Option<String>, u32)>, concurrency: usize, max_attempts: u32) {
    let broker = InMemoryBroker::new();

    let remaining: Arc<Mutex<HashMap<String, u32>>> = Arc::new(Mutex::new(
        messages
            .iter()
            .enumerate()
            .map(|(i, (_, failures))| (format!("m{i}"), *failures))
            .collect(),
    ));
    let handler = handler_fn({
        let remaining = Arc::clone(&remaining);
        move |message: Message| {
            let remaining = Arc::clone(&remaining);
            async move {
                let id = message.message_id.clone().unwrap_or_default();
                let mut remaining = remaining.lock().unwrap();
                let left = remaining.entry(id).or_insert(0);
                if *left > 0 {
                    *left -= 1;
                    return Err(HandlerError::failed("scripted"));
                }
                Ok(())
            }
        }
    });

    let connection = Arc::new(
        ConnectionManager::builder(Arc::new(broker.clone()))
            .url("amqp://in-memory")
            .backoff(BackoffPolicy::builder().initial_delay(Duration::from_millis(1)).build())
            .build()
            .unwrap(),
    );
    let consumer = Arc::new(
        Consumer::builder(
            connection,
            Arc::new(HandlerRegistry::new().with_handler("post.created", handler)),
        )
        .policy(
            DispatchPolicy::default()
                .with_concurrency(concurrency)
                .with_max_attempts(max_attempts),
        )
        .build()
        .unwrap(),
    );

    let (trigger, signal) = drain_channel();
    let task = tokio::spawn({
        let consumer = Arc::clone(&consumer);
        async move { consumer.run(signal).await }
    });

    let deadline = Instant::now() + Duration::from_secs(5);
    while broker.consumer_count(QUEUE) == 0 {
        assert!(Instant::now() < deadline, "consumer never registered");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    for (i, (pattern, _)) in messages.iter().enumerate() {
        let payload = format!(r#"{{"id":{i}}}"#);
        let message = match pattern {
            Some(pattern) => TestMessage::new(pattern.clone(), payload),
            None => TestMessage::without_pattern(payload),
        };
        broker.publish(EXCHANGE, "", message.with_message_id(format!("m{i}")));
    }

    let total: usize = messages
        .iter()
        .map(|(pattern, failures)| expected(pattern.as_deref(), *failures, max_attempts).len())
        .sum();
    while broker.settlements().len() < total {
        assert!(Instant::now() < deadline, "settlements incomplete: {:?}", broker.settlements());
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    trigger.drain();
    task.await.unwrap().unwrap();

    for (i, (pattern, failures)) in messages.iter().enumerate() {
        assert_eq!(
            broker.settlements_for(&format!("m{i}")),
            expected(pattern.as_deref(), *failures, max_attempts),
            "message m{i}"
        );
    }
    assert_eq!(broker.settlements().len(), total);
    assert!(broker.protocol_errors().is_empty());
    assert_eq!(broker.ready_count(QUEUE), 0);
    assert_eq!(broker.unacked_count(QUEUE), 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn each_message_is_settled_exactly_once_per_delivery(
        messages in strategies::messages(8),
        concurrency in 1_usize..4,
        max_attempts in 1_u32..5,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(run_scenario(messages, concurrency, max_attempts));
    }
}

#[test]
fn expected_settlements_follow_the_attempt_bound() {
    let ack = Settlement::Ack;
    let requeue = Settlement::Nack { requeue: true };
    let reject = Settlement::Reject { requeue: false };

    assert_eq!(expected(Some("post.created"), 0, 3), vec![ack]);
    assert_eq!(expected(Some("post.created"), 2, 3), vec![requeue, requeue, ack]);
    assert_eq!(expected(Some("post.created"), 4, 3), vec![requeue, requeue, reject]);
    assert_eq!(expected(Some("post.created"), 1, 1), vec![reject]);
    assert_eq!(expected(None, 3, 3), vec![reject]);
}
