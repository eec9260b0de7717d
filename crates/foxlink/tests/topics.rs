// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topic discovery, shared subscriptions and publishing.

mod common;

use common::{eventually, ready_session, string_channel, STRING_SCHEMA, STRING_TYPE};
use foxlink::codec::Encoding;
use foxlink::protocol::{ClientOp, ServerEvent};
use foxlink::protocol::memory::MemoryServer;
use foxlink::{Error, Session, SessionState, Subscription};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::{mpsc, Arc};
use std::time::Duration;

fn collector() -> (Arc<Mutex<Vec<Value>>>, impl Fn(Value) + Send + Sync + 'static) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    (received, move |message| sink.lock().push(message))
}

#[tokio::test]
async fn test_topics_follow_advertisements() {
    let (session, server) = ready_session(&["cdr"]).await;

    server
        .send(ServerEvent::Advertise(vec![
            string_channel(1, "/b"),
            string_channel(2, "/a"),
        ]))
        .await
        .unwrap();
    server.send(ServerEvent::Unadvertise(vec![2])).await.unwrap();
    // Re-advertised under a new id, and a repeated advertisement.
    server
        .send(ServerEvent::Advertise(vec![
            string_channel(3, "/a"),
            string_channel(1, "/b"),
        ]))
        .await
        .unwrap();
    server.send(ServerEvent::Unadvertise(vec![99])).await.unwrap();

    eventually(|| session.topic_type("/a").unwrap().is_some()).await;
    eventually(|| session.topics().unwrap().topics.len() == 2).await;
    let list = session.topics().unwrap();
    assert_eq!(list.topics, ["/a", "/b"]);
    assert_eq!(list.types, [STRING_TYPE, STRING_TYPE]);
    assert_eq!(
        session.topic_type("/b").unwrap().as_deref(),
        Some(STRING_TYPE)
    );
    assert_eq!(session.topic_type("/missing").unwrap(), None);
}

#[tokio::test]
async fn test_many_subscribers_share_one_subscription() {
    let (session, server) = ready_session(&["cdr"]).await;
    server
        .send(ServerEvent::Advertise(vec![string_channel(1, "/chatter")]))
        .await
        .unwrap();
    eventually(|| session.topic_type("/chatter").unwrap().is_some()).await;

    let mut subscriptions = Vec::new();
    for _ in 0..5 {
        subscriptions.push(
            session
                .create_subscription("/chatter", |_| {})
                .await
                .unwrap(),
        );
    }
    let ops = server.take_ops();
    let subscribes = common::subscribes(&ops);
    assert_eq!(subscribes.len(), 1);
    assert_eq!(subscribes[0].1, 1);
    assert_eq!(session.subscriber_count("/chatter"), 5);

    let last = subscriptions.pop().unwrap();
    for subscription in subscriptions {
        subscription.unsubscribe().unwrap();
    }
    assert!(common::unsubscribes(&server.ops()).is_empty());

    // Dropping the last handle releases the registration.
    drop(last);
    assert_eq!(common::unsubscribes(&server.ops()), [subscribes[0].0]);
    assert_eq!(session.subscriber_count("/chatter"), 0);
}

#[tokio::test]
async fn test_subscribe_before_advertise_receives_messages() {
    let (session, server) = ready_session(&["cdr"]).await;
    let (received, handler) = collector();

    let pending = {
        let session = session.clone();
        tokio::spawn(async move { session.create_subscription("/late", handler).await })
    };
    eventually(|| session.subscriber_count("/late") == 1).await;
    assert!(common::subscribes(&server.ops()).is_empty());

    server
        .send(ServerEvent::Advertise(vec![string_channel(7, "/late")]))
        .await
        .unwrap();
    let _subscription = pending.await.unwrap().unwrap();

    let subscribes = common::subscribes(&server.ops());
    assert_eq!(subscribes.len(), 1);
    let (subscription_id, channel_id) = subscribes[0];
    assert_eq!(channel_id, 7);

    let data = common::encode(Encoding::Cdr, STRING_TYPE, STRING_SCHEMA, &json!({"data": "first"}));
    server
        .send(ServerEvent::Message {
            subscription_id,
            timestamp: 0,
            data,
        })
        .await
        .unwrap();
    eventually(|| received.lock().len() == 1).await;
    assert_eq!(received.lock()[0], json!({"data": "first"}));
}

#[tokio::test]
async fn test_cancelled_subscribe_leaves_no_registration() {
    let (session, server) = ready_session(&["cdr"]).await;

    let pending = {
        let session = session.clone();
        tokio::spawn(async move { session.create_subscription("/never", |_| {}).await })
    };
    eventually(|| session.subscriber_count("/never") == 1).await;
    pending.abort();
    eventually(|| session.subscriber_count("/never") == 0).await;

    server
        .send(ServerEvent::Advertise(vec![string_channel(4, "/never")]))
        .await
        .unwrap();
    eventually(|| session.topic_type("/never").unwrap().is_some()).await;
    assert!(common::subscribes(&server.ops()).is_empty());
}

#[tokio::test]
async fn test_cancelled_publisher_withdraws_advertisement() {
    let (session, server) = ready_session(&["cdr"]).await;

    let pending = {
        let session = session.clone();
        tokio::spawn(async move { session.create_publisher("/later", STRING_TYPE).await })
    };
    eventually(|| session.publisher_count("/later") == 1).await;
    let advertised = common::advertises(&server.ops());
    assert_eq!(advertised.len(), 1);

    pending.abort();
    eventually(|| session.publisher_count("/later") == 0).await;
    assert_eq!(common::unadvertises(&server.ops()), advertised);
}

/// Subscription on `/in` whose handler owns a publisher on `/out`.
async fn relay(session: &Session, server: &MemoryServer) -> Subscription {
    server
        .send(ServerEvent::Advertise(vec![
            string_channel(1, "/in"),
            string_channel(2, "/out"),
        ]))
        .await
        .unwrap();
    eventually(|| session.topic_type("/out").unwrap().is_some()).await;
    let publisher = session.create_publisher("/out", STRING_TYPE).await.unwrap();
    session
        .create_subscription("/in", move |message| {
            let _ = publisher.publish(&message);
        })
        .await
        .unwrap()
}

/// Run `f` on its own thread, failing if it does not return within 2s.
fn finishes<F: FnOnce() + Send + 'static>(f: F) {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        f();
        let _ = tx.send(());
    });
    rx.recv_timeout(Duration::from_secs(2))
        .expect("returned within 2s");
}

#[tokio::test]
async fn test_unsubscribe_releases_handler_owned_publisher() {
    let (session, server) = ready_session(&["cdr"]).await;
    let subscription = relay(&session, &server).await;

    finishes(move || subscription.unsubscribe().unwrap());
    assert_eq!(session.subscriber_count("/in"), 0);
    assert_eq!(session.publisher_count("/out"), 0);
    assert_eq!(common::unsubscribes(&server.ops()).len(), 1);
    assert_eq!(common::unadvertises(&server.ops()).len(), 1);
}

#[tokio::test]
async fn test_close_releases_handler_owned_publisher() {
    let (session, server) = ready_session(&["cdr"]).await;
    let _subscription = relay(&session, &server).await;

    let closing = session.clone();
    finishes(move || closing.close());
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_publish_round_trip() {
    let (session, server) = ready_session(&["cdr"]).await;
    server
        .send(ServerEvent::Advertise(vec![string_channel(1, "/chatter")]))
        .await
        .unwrap();
    eventually(|| session.topic_type("/chatter").unwrap().is_some()).await;

    let (received, handler) = collector();
    let _subscription = session.create_subscription("/chatter", handler).await.unwrap();
    let publisher = session
        .create_publisher("/chatter", STRING_TYPE)
        .await
        .unwrap();
    publisher.publish(&json!({"data": "asdf"})).unwrap();

    let ops = server.ops();
    let advertised = ops
        .iter()
        .find_map(|op| match op {
            ClientOp::Advertise(channel) => Some(channel.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(advertised.id, publisher.publisher_id());
    assert_eq!(advertised.topic, "/chatter");
    assert_eq!(advertised.encoding, "cdr");
    assert_eq!(advertised.schema_name, STRING_TYPE);

    let data = ops
        .iter()
        .find_map(|op| match op {
            ClientOp::MessageData { publisher_id, data } if *publisher_id == advertised.id => {
                Some(data.clone())
            }
            _ => None,
        })
        .unwrap();
    assert_eq!(data, [0, 1, 0, 0, 5, 0, 0, 0, b'a', b's', b'd', b'f', 0]);

    // Echo it back the way a server relays a message.
    let (subscription_id, _) = common::subscribes(&ops)[0];
    server
        .send(ServerEvent::Message {
            subscription_id,
            timestamp: 42,
            data,
        })
        .await
        .unwrap();
    eventually(|| received.lock().len() == 1).await;
    assert_eq!(received.lock()[0], json!({"data": "asdf"}));
}

#[tokio::test]
async fn test_ros1_encoding_is_used_when_offered() {
    let (session, server) = ready_session(&["cdr", "ros1"]).await;
    assert_eq!(session.encoding().await.unwrap(), Encoding::Ros1);

    server
        .send(ServerEvent::Advertise(vec![string_channel(1, "/chatter")]))
        .await
        .unwrap();
    eventually(|| session.topic_type("/chatter").unwrap().is_some()).await;

    let publisher = session
        .create_publisher("/chatter", STRING_TYPE)
        .await
        .unwrap();
    publisher.publish(&json!({"data": "hi"})).unwrap();

    let ops = server.ops();
    assert!(ops.iter().any(|op| matches!(
        op,
        ClientOp::Advertise(channel) if channel.encoding == "ros1"
    )));
    assert!(ops.iter().any(|op| matches!(
        op,
        ClientOp::MessageData { data, .. } if data == &[2, 0, 0, 0, b'h', b'i']
    )));
}

#[tokio::test]
async fn test_publishers_share_one_advertisement() {
    let (session, server) = ready_session(&["cdr"]).await;

    // Advertised before the server knows the topic; resolves once it does.
    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.create_publisher("/cmd", STRING_TYPE).await })
    };
    eventually(|| session.publisher_count("/cmd") == 1).await;
    let advertised = common::advertises(&server.ops());
    assert_eq!(advertised.len(), 1);

    server
        .send(ServerEvent::Advertise(vec![string_channel(9, "/cmd")]))
        .await
        .unwrap();
    let first = first.await.unwrap().unwrap();
    let second = session.create_publisher("/cmd", STRING_TYPE).await.unwrap();
    assert_eq!(first.publisher_id(), second.publisher_id());
    assert_eq!(common::advertises(&server.ops()).len(), 1);
    assert_eq!(session.publisher_count("/cmd"), 2);

    first.unadvertise().unwrap();
    assert!(common::unadvertises(&server.ops()).is_empty());
    second.publish(&json!({"data": "still here"})).unwrap();

    drop(second);
    assert_eq!(common::unadvertises(&server.ops()), advertised);
    assert_eq!(session.publisher_count("/cmd"), 0);
}

#[tokio::test]
async fn test_withdrawn_topic_is_no_longer_advertised() {
    let (session, server) = ready_session(&["cdr"]).await;
    server
        .send(ServerEvent::Advertise(vec![string_channel(1, "/a")]))
        .await
        .unwrap();
    eventually(|| session.topic_type("/a").unwrap().is_some()).await;

    let subscription = session.create_subscription("/a", |_| {}).await.unwrap();
    let publisher = session.create_publisher("/a", STRING_TYPE).await.unwrap();

    server.send(ServerEvent::Unadvertise(vec![1])).await.unwrap();
    eventually(|| session.topic_type("/a").unwrap().is_none()).await;

    assert!(matches!(
        publisher.publish(&json!({"data": "x"})),
        Err(Error::NoLongerAdvertised(name)) if name == "/a"
    ));
    assert!(matches!(
        session.create_subscription("/a", |_| {}).await,
        Err(Error::NoLongerAdvertised(_))
    ));

    // The server already dropped the subscription.
    server.take_ops();
    drop(subscription);
    assert!(common::unsubscribes(&server.ops()).is_empty());

    // Advertised again: the publisher rebinds.
    server
        .send(ServerEvent::Advertise(vec![string_channel(4, "/a")]))
        .await
        .unwrap();
    eventually(|| publisher.publish(&json!({"data": "back"})).is_ok()).await;
}

#[tokio::test]
async fn test_undecodable_message_is_dropped() {
    let (session, server) = ready_session(&["cdr"]).await;
    server
        .send(ServerEvent::Advertise(vec![string_channel(1, "/chatter")]))
        .await
        .unwrap();
    eventually(|| session.topic_type("/chatter").unwrap().is_some()).await;

    let (received, handler) = collector();
    let _subscription = session.create_subscription("/chatter", handler).await.unwrap();
    let (subscription_id, _) = common::subscribes(&server.ops())[0];

    server
        .send(ServerEvent::Message {
            subscription_id,
            timestamp: 0,
            data: vec![0, 1, 0, 0, 0xff],
        })
        .await
        .unwrap();
    let data = common::encode(Encoding::Cdr, STRING_TYPE, STRING_SCHEMA, &json!({"data": "ok"}));
    server
        .send(ServerEvent::Message {
            subscription_id,
            timestamp: 0,
            data,
        })
        .await
        .unwrap();

    eventually(|| received.lock().len() == 1).await;
    assert_eq!(received.lock()[0], json!({"data": "ok"}));
}

#[tokio::test]
async fn test_reused_channel_id_withdraws_previous_topic() {
    let (session, server) = ready_session(&["cdr"]).await;
    server
        .send(ServerEvent::Advertise(vec![string_channel(1, "/a")]))
        .await
        .unwrap();
    eventually(|| session.topic_type("/a").unwrap().is_some()).await;
    let _subscription = session.create_subscription("/a", |_| {}).await.unwrap();
    let publisher = session.create_publisher("/a", STRING_TYPE).await.unwrap();

    // Same channel id, different topic, no unadvertise in between.
    server
        .send(ServerEvent::Advertise(vec![string_channel(1, "/b")]))
        .await
        .unwrap();
    eventually(|| session.topic_type("/a").unwrap().is_none()).await;
    assert_eq!(session.topic_type("/b").unwrap().as_deref(), Some(STRING_TYPE));

    assert!(matches!(
        publisher.publish(&json!({"data": "x"})),
        Err(Error::NoLongerAdvertised(name)) if name == "/a"
    ));
    assert!(matches!(
        session.create_subscription("/a", |_| {}).await,
        Err(Error::NoLongerAdvertised(_))
    ));
}
