use serde_json::json;

use super::channel::{ChannelId, ChannelIdError, Wildcard};
use super::message::{Advice, BinaryPayload, Message, Reconnect, SubscriptionField};

#[test]
fn test_channel_parse_and_kinds() {
    let c = ChannelId::parse("/stock/goog").unwrap();
    assert_eq!(c.wildcard(), Wildcard::None);
    assert!(!c.is_wild());

    let single = ChannelId::parse("/stock/*").unwrap();
    assert_eq!(single.wildcard(), Wildcard::Single);

    let deep = ChannelId::parse("/stock/**").unwrap();
    assert_eq!(deep.wildcard(), Wildcard::Deep);

    assert!(ChannelId::parse("/meta/connect").unwrap().is_meta());
    assert!(ChannelId::parse("/service/chat").unwrap().is_service());
    assert!(!ChannelId::parse("/stock/goog").unwrap().is_meta());
}

#[test]
fn test_channel_parse_rejects_malformed_ids() {
    assert_eq!(ChannelId::parse("stock"), Err(ChannelIdError::MissingSlash));
    assert_eq!(
        ChannelId::parse("/stock//goog"),
        Err(ChannelIdError::EmptySegment)
    );
    assert_eq!(ChannelId::parse("/"), Err(ChannelIdError::EmptySegment));
    assert_eq!(
        ChannelId::parse("/stock/*/trades"),
        Err(ChannelIdError::WildcardPosition)
    );
    assert_eq!(
        ChannelId::parse("/stock/go*og"),
        Err(ChannelIdError::WildcardPosition)
    );
}

#[test]
fn test_single_wildcard_matches_one_segment() {
    let w = ChannelId::parse("/stock/*").unwrap();
    assert!(w.matches(&ChannelId::parse("/stock/goog").unwrap()));
    assert!(!w.matches(&ChannelId::parse("/stock/goog/trades").unwrap()));
    assert!(!w.matches(&ChannelId::parse("/stock").unwrap()));
    assert!(!w.matches(&ChannelId::parse("/forex/eur").unwrap()));
}

#[test]
fn test_deep_wildcard_matches_prefix_and_descendants() {
    let w = ChannelId::parse("/stock/**").unwrap();
    assert!(w.matches(&ChannelId::parse("/stock").unwrap()));
    assert!(w.matches(&ChannelId::parse("/stock/goog").unwrap()));
    assert!(w.matches(&ChannelId::parse("/stock/goog/trades").unwrap()));
    assert!(!w.matches(&ChannelId::parse("/forex/eur").unwrap()));

    let root = ChannelId::parse("/**").unwrap();
    assert!(root.matches(&ChannelId::parse("/anything/at/all").unwrap()));
}

#[test]
fn test_wildcard_expansions() {
    let c = ChannelId::parse("/a/b/c").unwrap();
    let expansions = c.wildcard_expansions();
    assert_eq!(expansions, vec!["/a/b/*", "/**", "/a/**", "/a/b/**"]);

    let top = ChannelId::parse("/a").unwrap();
    assert_eq!(top.wildcard_expansions(), vec!["/*", "/**"]);

    // A wildcard channel has no further expansions of its own.
    assert!(ChannelId::parse("/a/*").unwrap().wildcard_expansions().is_empty());
}

#[test]
fn test_message_serialization_skips_absent_fields() {
    let msg = Message::publish("/chat/room", json!({"text": "hi"}));
    let value = serde_json::to_value(&msg).unwrap();
    assert_eq!(value["channel"], "/chat/room");
    assert_eq!(value["data"]["text"], "hi");
    assert!(value.get("clientId").is_none());
    assert!(value.get("successful").is_none());
    assert!(value.get("ext").is_none());
}

#[test]
fn test_falsy_data_round_trips() {
    for falsy in [json!(""), json!(0)] {
        let msg = Message::publish("/chat/room", falsy.clone());
        let text = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&text).unwrap();
        // Present-but-falsy is not the same as absent.
        assert_eq!(back.data, Some(falsy));
    }

    let empty = Message::new("/chat/room");
    let text = serde_json::to_string(&empty).unwrap();
    let back: Message = serde_json::from_str(&text).unwrap();
    assert_eq!(back.data, None);
}

#[test]
fn test_subscription_field_string_or_array() {
    let one: Message =
        serde_json::from_str(r#"{"channel":"/meta/subscribe","subscription":"/foo"}"#).unwrap();
    assert_eq!(
        one.subscription,
        Some(SubscriptionField::One("/foo".to_string()))
    );

    let many: Message = serde_json::from_str(
        r#"{"channel":"/meta/subscribe","subscription":["/foo","/bar"]}"#,
    )
    .unwrap();
    assert_eq!(
        many.subscription,
        Some(SubscriptionField::Many(vec![
            "/foo".to_string(),
            "/bar".to_string()
        ]))
    );
    assert_eq!(many.subscription.unwrap().channels(), vec!["/foo", "/bar"]);
}

#[test]
fn test_advice_reconnect_is_lowercase_on_the_wire() {
    let advice = Advice::reconnect(Reconnect::None);
    let value = serde_json::to_value(&advice).unwrap();
    assert_eq!(value["reconnect"], "none");

    let parsed: Advice =
        serde_json::from_str(r#"{"reconnect":"handshake","interval":500}"#).unwrap();
    assert_eq!(parsed.reconnect, Some(Reconnect::Handshake));
    assert_eq!(parsed.interval, Some(500));
}

#[test]
fn test_reply_to_copies_correlation_fields() {
    let mut request = Message::new("/meta/subscribe");
    request.id = Some("7".to_string());
    request.client_id = Some("abc".to_string());
    let reply = Message::reply_to(&request, true);
    assert_eq!(reply.channel, "/meta/subscribe");
    assert_eq!(reply.id, Some("7".to_string()));
    assert_eq!(reply.client_id, Some("abc".to_string()));
    assert_eq!(reply.successful, Some(true));
}

#[test]
fn test_binary_payload_round_trips_unchanged() {
    let mut meta = serde_json::Map::new();
    meta.insert("contentType".to_string(), json!("application/octet-stream"));
    let payload = BinaryPayload {
        data: json!("AQIDBA=="),
        last: false,
        meta: Some(meta),
    };
    let value = payload.to_value();
    let back = BinaryPayload::from_value(&value).unwrap();
    assert_eq!(back, payload);
    assert!(!back.last);
    assert_eq!(value["meta"]["contentType"], "application/octet-stream");
}
