//! Integration tests for the process-wide delivery queue
#![allow(clippy::expect_used, clippy::unwrap_used)]

mod support;

use std::{
    sync::{Arc, Mutex},
    thread,
};

use empath_notify::{
    delivery::{DeliveryChannel, DeliveryMode, DeliveryQueue},
    message::OutboundMessage,
};
use pretty_assertions::assert_eq;
use support::RecordingSender;

const PRODUCERS: usize = 4;
const PER_PRODUCER: usize = 16;

fn outbound(id: &str) -> OutboundMessage {
    OutboundMessage {
        from: "Tracker <trac@example.com>".to_string(),
        recipients: vec![format!("{id}@example.com")],
        message: format!("Subject: {id}\r\n\r\n{id}\r\n"),
    }
}

#[tokio::test]
async fn test_interleaved_producers_are_delivered_in_enqueue_order() {
    let queue = DeliveryQueue::global().unwrap();
    let sender = RecordingSender::new();
    let enqueued = Arc::new(Mutex::new(Vec::new()));

    let producers = (0..PRODUCERS)
        .map(|producer| {
            let sender = sender.clone();
            let enqueued = Arc::clone(&enqueued);
            thread::spawn(move || {
                for n in 0..PER_PRODUCER {
                    let id = format!("p{producer}-m{n}");
                    // Enqueue and record under one lock, so `enqueued` is the
                    // true enqueue order.
                    let mut order = enqueued.lock().unwrap();
                    queue.enqueue(sender.clone(), outbound(&id)).unwrap();
                    order.push(id);
                    drop(order);
                    thread::yield_now();
                }
            })
        })
        .collect::<Vec<_>>();

    for producer in producers {
        producer.join().unwrap();
    }
    queue.flush().await.unwrap();

    let delivered = sender
        .sent()
        .into_iter()
        .map(|sent| sent.message)
        .collect::<Vec<_>>();
    let expected = enqueued
        .lock()
        .unwrap()
        .iter()
        .map(|id| format!("Subject: {id}\r\n\r\n{id}\r\n"))
        .collect::<Vec<_>>();

    assert_eq!(delivered.len(), PRODUCERS * PER_PRODUCER);
    assert_eq!(delivered, expected);
}

#[tokio::test]
async fn test_queued_channels_from_concurrent_tasks() {
    let sender = RecordingSender::new();
    let channel = DeliveryChannel::new(DeliveryMode::Queued, sender.clone());

    let tasks = (0..50)
        .map(|n| {
            let channel = channel.clone();
            tokio::spawn(async move { channel.deliver(outbound(&format!("task{n}"))).await })
        })
        .collect::<Vec<_>>();

    for task in tasks {
        task.await.unwrap().unwrap();
    }
    DeliveryQueue::global().unwrap().flush().await.unwrap();

    let mut recipients = sender
        .sent()
        .into_iter()
        .flat_map(|sent| sent.recipients)
        .collect::<Vec<_>>();
    recipients.sort();
    let mut expected = (0..50)
        .map(|n| format!("task{n}@example.com"))
        .collect::<Vec<_>>();
    expected.sort();

    assert_eq!(recipients, expected);
}

#[test]
fn test_queue_is_created_once() {
    let handles = (0..8)
        .map(|_| thread::spawn(|| std::ptr::from_ref(DeliveryQueue::global().unwrap()) as usize))
        .collect::<Vec<_>>();

    let addresses = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect::<Vec<_>>();

    assert!(addresses.windows(2).all(|pair| pair[0] == pair[1]));
}
