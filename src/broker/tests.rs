use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::config::BrokerSettings;
use crate::extension::Extension;
use crate::protocol::{
    ChannelId, Message, Reconnect, SubscriptionField, META_CONNECT, META_DISCONNECT,
    META_HANDSHAKE, META_SUBSCRIBE, META_UNSUBSCRIBE,
};

use super::policy::SecurityPolicy;
use super::sessions::Session;
use super::{Broker, PollError};

fn test_settings() -> BrokerSettings {
    BrokerSettings {
        timeout_ms: 100,
        max_interval_ms: 60_000,
        max_queue: 8,
        allowed_transports: vec!["websocket".to_string(), "local".to_string()],
    }
}

fn test_broker() -> Broker {
    Broker::new(test_settings())
}

fn handshake(broker: &Broker) -> String {
    let mut request = Message::new(META_HANDSHAKE);
    request.version = Some("1.0".to_string());
    request.supported_connection_types = Some(vec!["websocket".to_string()]);
    request.id = Some("1".to_string());
    let replies = broker.process(vec![request]);
    assert_eq!(replies[0].successful, Some(true));
    replies[0].client_id.clone().expect("clientId in reply")
}

fn subscribe(broker: &Broker, client_id: &str, channel: &str) -> Message {
    let mut request = Message::new(META_SUBSCRIBE);
    request.client_id = Some(client_id.to_string());
    request.subscription = Some(SubscriptionField::One(channel.to_string()));
    broker.process(vec![request]).remove(0)
}

fn publish_from(broker: &Broker, client_id: &str, channel: &str, data: serde_json::Value) -> Message {
    let mut request = Message::publish(channel, data);
    request.client_id = Some(client_id.to_string());
    broker.process(vec![request]).remove(0)
}

#[test]
fn test_handshake_creates_session() {
    let broker = test_broker();
    let mut request = Message::new(META_HANDSHAKE);
    request.version = Some("1.0".to_string());
    request.supported_connection_types = Some(vec!["websocket".to_string()]);
    request.id = Some("7".to_string());

    let replies = broker.process(vec![request]);
    let reply = &replies[0];
    assert_eq!(reply.channel, META_HANDSHAKE);
    assert_eq!(reply.id.as_deref(), Some("7"));
    assert_eq!(reply.successful, Some(true));
    assert_eq!(reply.version.as_deref(), Some("1.0"));
    assert_eq!(
        reply.advice.as_ref().and_then(|a| a.reconnect),
        Some(Reconnect::Retry)
    );
    let client_id = reply.client_id.as_deref().unwrap();
    assert!(broker.session(client_id).is_some());
    assert_eq!(broker.session_count(), 1);
}

#[test]
fn test_handshake_without_common_transport_is_terminal() {
    let broker = test_broker();
    let mut request = Message::new(META_HANDSHAKE);
    request.supported_connection_types = Some(vec!["smoke-signal".to_string()]);

    let reply = broker.process(vec![request]).remove(0);
    assert_eq!(reply.successful, Some(false));
    assert_eq!(
        reply.advice.as_ref().and_then(|a| a.reconnect),
        Some(Reconnect::None)
    );
    assert!(reply.client_id.is_none());
    assert_eq!(broker.session_count(), 0);
    // The server still advertises what it would have accepted.
    assert_eq!(
        reply.supported_connection_types.as_deref(),
        Some(&["websocket".to_string(), "local".to_string()][..])
    );
}

#[test]
fn test_connect_with_unknown_client_advises_handshake() {
    let broker = test_broker();
    let mut request = Message::new(META_CONNECT);
    request.client_id = Some("no-such-session".to_string());
    request.connection_type = Some("websocket".to_string());

    let reply = broker.process(vec![request]).remove(0);
    assert_eq!(reply.successful, Some(false));
    assert!(reply.error.as_deref().unwrap().starts_with("402"));
    assert_eq!(
        reply.advice.as_ref().and_then(|a| a.reconnect),
        Some(Reconnect::Handshake)
    );
}

#[test]
fn test_publish_fans_out_to_subscribers_only() {
    let broker = test_broker();
    let alice = handshake(&broker);
    let bob = handshake(&broker);
    let carol = handshake(&broker);
    assert_eq!(subscribe(&broker, &alice, "/chat/room").successful, Some(true));
    assert_eq!(subscribe(&broker, &bob, "/chat/room").successful, Some(true));

    let reply = publish_from(&broker, &carol, "/chat/room", json!({"text": "hi"}));
    assert_eq!(reply.successful, Some(true));

    for id in [&alice, &bob] {
        let batch = broker.session(id).unwrap().drain();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].channel, "/chat/room");
        assert_eq!(batch[0].data, Some(json!({"text": "hi"})));
    }
    // The publisher is not subscribed and gets nothing queued.
    assert_eq!(broker.session(&carol).unwrap().queued(), 0);
}

#[test]
fn test_subscribed_publisher_receives_own_message() {
    let broker = test_broker();
    let alice = handshake(&broker);
    subscribe(&broker, &alice, "/echo");

    publish_from(&broker, &alice, "/echo", json!(42));
    let batch = broker.session(&alice).unwrap().drain();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].data, Some(json!(42)));
}

#[test]
fn test_wildcard_matching_depth() {
    let broker = test_broker();
    let shallow = handshake(&broker);
    let deep = handshake(&broker);
    subscribe(&broker, &shallow, "/stocks/*");
    subscribe(&broker, &deep, "/stocks/**");

    let publisher = handshake(&broker);
    publish_from(&broker, &publisher, "/stocks/ibm", json!(1));
    assert_eq!(broker.session(&shallow).unwrap().drain().len(), 1);
    assert_eq!(broker.session(&deep).unwrap().drain().len(), 1);

    publish_from(&broker, &publisher, "/stocks/nyse/ibm", json!(2));
    assert_eq!(broker.session(&shallow).unwrap().queued(), 0);
    assert_eq!(broker.session(&deep).unwrap().drain().len(), 1);
}

#[test]
fn test_overlapping_wildcards_deliver_once() {
    let broker = test_broker();
    let alice = handshake(&broker);
    subscribe(&broker, &alice, "/a/b");
    subscribe(&broker, &alice, "/a/*");
    subscribe(&broker, &alice, "/a/**");

    let publisher = handshake(&broker);
    publish_from(&broker, &publisher, "/a/b", json!("once"));
    assert_eq!(broker.session(&alice).unwrap().drain().len(), 1);
}

#[test]
fn test_service_channel_skips_subscribers() {
    let broker = test_broker();
    let hits = Arc::new(AtomicUsize::new(0));
    let h = hits.clone();
    broker
        .add_listener("/service/echo", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    let alice = handshake(&broker);
    // Subscribing a service channel succeeds but records nothing.
    assert_eq!(subscribe(&broker, &alice, "/service/echo").successful, Some(true));

    let reply = publish_from(&broker, &alice, "/service/echo", json!("ping"));
    assert_eq!(reply.successful, Some(true));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(broker.session(&alice).unwrap().queued(), 0);
}

#[test]
fn test_subscribe_array_mirrors_shape_and_is_partial() {
    let broker = test_broker();
    let alice = handshake(&broker);

    let mut request = Message::new(META_SUBSCRIBE);
    request.client_id = Some(alice.clone());
    request.subscription = Some(SubscriptionField::Many(vec![
        "/ok/one".to_string(),
        "missing-slash".to_string(),
        "/ok/two".to_string(),
    ]));
    let reply = broker.process(vec![request]).remove(0);

    // The reply mirrors the array shape; one bad channel fails the batch but
    // the valid ones are still applied.
    assert_eq!(reply.successful, Some(false));
    assert!(matches!(reply.subscription, Some(SubscriptionField::Many(_))));
    assert!(reply.error.as_deref().unwrap().starts_with("405"));
    let session = broker.session(&alice).unwrap();
    assert!(session.is_subscribed("/ok/one"));
    assert!(session.is_subscribed("/ok/two"));
}

#[test]
fn test_meta_subscribe_is_refused() {
    let broker = test_broker();
    let alice = handshake(&broker);
    let reply = subscribe(&broker, &alice, "/meta/connect");
    assert_eq!(reply.successful, Some(false));
    assert!(reply.error.as_deref().unwrap().starts_with("403"));
}

#[test]
fn test_subscribe_without_session_is_refused() {
    let broker = test_broker();
    let mut request = Message::new(META_SUBSCRIBE);
    request.client_id = Some("ghost".to_string());
    request.subscription = Some(SubscriptionField::One("/chat".to_string()));
    let reply = broker.process(vec![request]).remove(0);
    assert_eq!(reply.successful, Some(false));
    assert!(reply.error.as_deref().unwrap().starts_with("402"));
}

#[test]
fn test_unsubscribe_stops_delivery() {
    let broker = test_broker();
    let alice = handshake(&broker);
    subscribe(&broker, &alice, "/feed");

    let mut request = Message::new(META_UNSUBSCRIBE);
    request.client_id = Some(alice.clone());
    request.subscription = Some(SubscriptionField::One("/feed".to_string()));
    let reply = broker.process(vec![request]).remove(0);
    assert_eq!(reply.successful, Some(true));

    let publisher = handshake(&broker);
    publish_from(&broker, &publisher, "/feed", json!(1));
    assert_eq!(broker.session(&alice).unwrap().queued(), 0);
    // The emptied channel is swept.
    assert!(!broker.channels.contains("/feed"));

    // Re-subscribing restores delivery.
    assert_eq!(subscribe(&broker, &alice, "/feed").successful, Some(true));
    publish_from(&broker, &publisher, "/feed", json!(2));
    let batch = broker.session(&alice).unwrap().drain();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].data, Some(json!(2)));
}

#[test]
fn test_disconnect_cascades_subscriptions() {
    let broker = test_broker();
    let alice = handshake(&broker);
    subscribe(&broker, &alice, "/a/one");
    subscribe(&broker, &alice, "/a/two");

    let mut request = Message::new(META_DISCONNECT);
    request.client_id = Some(alice.clone());
    let reply = broker.process(vec![request]).remove(0);
    assert_eq!(reply.channel, META_DISCONNECT);
    assert_eq!(reply.successful, Some(true));

    assert!(broker.session(&alice).is_none());
    assert!(!broker.channels.contains("/a/one"));
    assert!(!broker.channels.contains("/a/two"));
}

#[test]
fn test_destroy_session_reports_dropped_subscriptions() {
    let broker = test_broker();
    let alice = handshake(&broker);
    subscribe(&broker, &alice, "/b/x");
    subscribe(&broker, &alice, "/a/y");

    let dropped = broker.destroy_session(&alice).unwrap();
    assert_eq!(dropped, vec!["/a/y".to_string(), "/b/x".to_string()]);
    assert!(broker.destroy_session(&alice).is_none());
}

#[test]
fn test_falsy_payloads_are_queued() {
    let broker = test_broker();
    let alice = handshake(&broker);
    subscribe(&broker, &alice, "/edge");

    let publisher = handshake(&broker);
    publish_from(&broker, &publisher, "/edge", json!(""));
    publish_from(&broker, &publisher, "/edge", json!(0));

    let batch = broker.session(&alice).unwrap().drain();
    assert_eq!(batch[0].data, Some(json!("")));
    assert_eq!(batch[1].data, Some(json!(0)));
}

#[test]
fn test_queue_overflow_drops_newest() {
    let broker = Broker::new(BrokerSettings {
        max_queue: 2,
        ..test_settings()
    });
    let alice = handshake(&broker);
    subscribe(&broker, &alice, "/flood");

    let publisher = handshake(&broker);
    for i in 0..5 {
        publish_from(&broker, &publisher, "/flood", json!(i));
    }
    let batch = broker.session(&alice).unwrap().drain();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].data, Some(json!(0)));
    assert_eq!(batch[1].data, Some(json!(1)));
}

#[test]
fn test_publish_to_invalid_channel_is_rejected() {
    let broker = test_broker();
    let alice = handshake(&broker);
    let reply = publish_from(&broker, &alice, "no-slash", json!(1));
    assert_eq!(reply.successful, Some(false));
    assert!(reply.error.as_deref().unwrap().starts_with("405"));
}

#[test]
fn test_publish_from_unknown_client_is_rejected() {
    let broker = test_broker();
    let reply = publish_from(&broker, "ghost", "/chat", json!(1));
    assert_eq!(reply.successful, Some(false));
    assert!(reply.error.as_deref().unwrap().starts_with("402"));
}

#[test]
fn test_server_publish_has_no_reply() {
    let broker = test_broker();
    let alice = handshake(&broker);
    subscribe(&broker, &alice, "/news");

    broker.publish("/news", json!("flash")).unwrap();
    assert_eq!(broker.session(&alice).unwrap().drain().len(), 1);
    assert!(broker.publish("bad channel", json!(1)).is_err());
}

#[test]
fn test_deliver_to_bypasses_subscriptions() {
    let broker = test_broker();
    let alice = handshake(&broker);

    assert!(broker.deliver_to(&alice, "/direct", json!("for you")));
    assert!(!broker.deliver_to("ghost", "/direct", json!("lost")));

    let batch = broker.session(&alice).unwrap().drain();
    assert_eq!(batch[0].channel, "/direct");
}

#[test]
fn test_incoming_veto_drops_silently() {
    struct RejectFlood;
    impl Extension for RejectFlood {
        fn incoming(&self, message: &mut Message) -> bool {
            message.channel != "/flood"
        }
    }

    let broker = test_broker();
    broker.register_extension("reject-flood", Arc::new(RejectFlood));
    let alice = handshake(&broker);
    subscribe(&broker, &alice, "/flood");

    let publisher = handshake(&broker);
    let mut request = Message::publish("/flood", json!(1));
    request.client_id = Some(publisher);
    let replies = broker.process(vec![request]);
    // No delivery and no reply at all.
    assert!(replies.is_empty());
    assert_eq!(broker.session(&alice).unwrap().queued(), 0);
}

#[test]
fn test_session_extension_tags_deliveries() {
    struct Stamp;
    impl Extension for Stamp {
        fn outgoing(&self, message: &mut Message) -> bool {
            message.ext_mut().insert("stamped".to_string(), json!(true));
            true
        }
    }

    let broker = test_broker();
    let alice = handshake(&broker);
    subscribe(&broker, &alice, "/tagged");
    broker
        .session(&alice)
        .unwrap()
        .extensions()
        .register("stamp", Arc::new(Stamp));

    let publisher = handshake(&broker);
    publish_from(&broker, &publisher, "/tagged", json!(1));
    let batch = broker.session(&alice).unwrap().drain();
    assert_eq!(
        batch[0].ext.as_ref().and_then(|e| e.get("stamped")),
        Some(&json!(true))
    );
}

#[test]
fn test_listener_panic_does_not_stop_fanout() {
    let broker = test_broker();
    broker
        .add_listener("/risky", |_| panic!("listener bug"))
        .unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let h = hits.clone();
    broker
        .add_listener("/risky", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    let alice = handshake(&broker);
    subscribe(&broker, &alice, "/risky");
    let publisher = handshake(&broker);
    publish_from(&broker, &publisher, "/risky", json!(1));

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(broker.session(&alice).unwrap().drain().len(), 1);
}

#[test]
fn test_security_policy_denials() {
    struct NoSecrets;
    impl SecurityPolicy for NoSecrets {
        fn can_subscribe(&self, _session: &Session, channel: &ChannelId) -> bool {
            !channel.as_str().starts_with("/secret")
        }
        fn can_publish(
            &self,
            _session: Option<&Session>,
            channel: &ChannelId,
            _message: &Message,
        ) -> bool {
            !channel.as_str().starts_with("/secret")
        }
    }

    let broker = Broker::with_policy(test_settings(), Arc::new(NoSecrets));
    let alice = handshake(&broker);

    let reply = subscribe(&broker, &alice, "/secret/files");
    assert_eq!(reply.successful, Some(false));
    assert!(reply.error.as_deref().unwrap().starts_with("403"));

    let reply = publish_from(&broker, &alice, "/secret/files", json!(1));
    assert_eq!(reply.successful, Some(false));
    assert!(reply.error.as_deref().unwrap().starts_with("403"));

    assert_eq!(subscribe(&broker, &alice, "/open").successful, Some(true));
}

#[test]
fn test_persistent_channel_survives_emptiness() {
    let broker = test_broker();
    broker.set_persistent("/durable", true).unwrap();
    assert!(broker.channels.contains("/durable"));

    let alice = handshake(&broker);
    subscribe(&broker, &alice, "/durable");
    broker.destroy_session(&alice);
    assert!(broker.channels.contains("/durable"));

    broker.set_persistent("/durable", false).unwrap();
    assert!(!broker.channels.contains("/durable"));
}

#[test]
fn test_sweep_expired_destroys_idle_sessions() {
    let broker = Broker::new(BrokerSettings {
        max_interval_ms: 10,
        ..test_settings()
    });
    let alice = handshake(&broker);
    subscribe(&broker, &alice, "/idle");

    std::thread::sleep(Duration::from_millis(30));
    broker.sweep_expired();
    assert!(broker.session(&alice).is_none());
    assert!(!broker.channels.contains("/idle"));
}

#[tokio::test]
async fn test_poll_returns_queued_batch() {
    let broker = test_broker();
    let alice = handshake(&broker);
    subscribe(&broker, &alice, "/poll");
    let publisher = handshake(&broker);
    publish_from(&broker, &publisher, "/poll", json!("a"));
    publish_from(&broker, &publisher, "/poll", json!("b"));

    let batch = broker.poll(&alice, Duration::from_millis(100)).await.unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].data, Some(json!("a")));
}

#[tokio::test]
async fn test_poll_wakes_on_late_publish() {
    let broker = Arc::new(test_broker());
    let alice = handshake(&broker);
    subscribe(&broker, &alice, "/late");

    let server = broker.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        server.publish("/late", json!("woke")).unwrap();
    });

    let batch = broker.poll(&alice, Duration::from_secs(2)).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].data, Some(json!("woke")));
}

#[tokio::test]
async fn test_poll_times_out_empty() {
    let broker = test_broker();
    let alice = handshake(&broker);
    let batch = broker.poll(&alice, Duration::from_millis(20)).await.unwrap();
    assert!(batch.is_empty());
}

#[tokio::test]
async fn test_poll_errors_when_session_destroyed() {
    let broker = Arc::new(test_broker());
    let alice = handshake(&broker);

    let server = broker.clone();
    let victim = alice.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        server.destroy_session(&victim);
    });

    let err = broker.poll(&alice, Duration::from_secs(2)).await.unwrap_err();
    assert_eq!(err, PollError::SessionDestroyed);

    let err = broker.poll("ghost", Duration::from_millis(10)).await.unwrap_err();
    assert_eq!(err, PollError::UnknownSession);
}
