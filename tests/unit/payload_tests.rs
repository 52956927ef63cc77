//! Unit tests for sync payload construction and wire mapping.

use serde_json::json;

use chat_bridge::models::event::{ChatKind, InboundMessage, PeerInfo, PeerKind, SenderInfo};
use chat_bridge::models::payload::{SyncPayload, SYSTEM_NOTICES_PEER_ID};

fn message(peer_id: &str, text: Option<&str>) -> InboundMessage {
    InboundMessage {
        chat: ChatKind::Private,
        peer: PeerInfo {
            id: peer_id.into(),
            kind: PeerKind::User,
            name: "Carol".into(),
            username: Some("carol".into()),
            is_bot: false,
        },
        sender: Some(SenderInfo {
            id: Some("42".into()),
            name: Some("Carol".into()),
            is_bot: false,
        }),
        message_id: 77,
        text: text.map(str::to_owned),
        outgoing: true,
        via_bot: false,
        timestamp: 1_700_000_000_000,
        media_type: text.is_none().then(|| "photo".to_owned()),
        reply_to_id: Some(76),
    }
}

#[test]
fn payload_copies_event_fields() {
    let payload = SyncPayload::from_event("acct", &message("5001", Some("hi")));

    assert_eq!(payload.account_id, "acct");
    assert_eq!(payload.peer_id, "5001");
    assert_eq!(payload.peer_type, "user");
    assert_eq!(payload.message_id, 77);
    assert_eq!(payload.from_id.as_deref(), Some("42"));
    assert!(payload.is_outgoing);
    assert!(!payload.is_bot);
    assert_eq!(payload.reply_to_id, Some(76));
}

#[test]
fn ingest_args_use_backend_field_names() {
    let payload = SyncPayload::from_event("acct", &message("5001", Some("hi")));
    let args = serde_json::to_value(payload.to_ingest_args()).expect("serializable");

    assert_eq!(args["accountId"], json!("acct"));
    assert_eq!(args["peerId"], json!("5001"));
    assert_eq!(args["peerType"], json!("user"));
    assert_eq!(args["telegramId"], json!(77));
    assert_eq!(args["isOutgoing"], json!(true));
    assert_eq!(args["replyToId"], json!(76));
    assert_eq!(args["isBot"], json!(false));
}

#[test]
fn preview_truncates_text_to_thirty_chars() {
    let long = "a".repeat(50);
    let payload = SyncPayload::from_event("acct", &message("5001", Some(&long)));

    assert_eq!(payload.preview().chars().count(), 30);
}

#[test]
fn preview_of_media_only_message_is_placeholder() {
    let payload = SyncPayload::from_event("acct", &message("5001", None));

    assert_eq!(payload.preview(), "[media]");
}

#[test]
fn system_notice_peer_is_detected() {
    let payload = SyncPayload::from_event("acct", &message(SYSTEM_NOTICES_PEER_ID, Some("code")));
    assert!(payload.is_system_notice());

    let payload = SyncPayload::from_event("acct", &message("5001", Some("code")));
    assert!(!payload.is_system_notice());
}

#[test]
fn stored_payload_with_legacy_field_name_decodes() {
    let raw = json!({
        "account_id": "acct",
        "peer_id": "5001",
        "peer_type": "user",
        "name": "Carol",
        "username": null,
        "telegram_id": 12,
        "text": "legacy",
        "from_id": null,
        "from_name": null,
        "is_outgoing": false,
        "timestamp": 1,
        "media_type": null,
        "reply_to_id": null
    });

    let payload: SyncPayload = serde_json::from_value(raw).expect("legacy shape decodes");

    assert_eq!(payload.message_id, 12);
    assert!(!payload.is_bot, "missing bot flag defaults to false");
}
