//! Unit tests for notification envelopes and text helpers.

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use chat_bridge::notify::{short_id, truncate, LineSink, Notification, NotificationKind, Notifier};

#[derive(Default)]
struct Lines(Mutex<Vec<String>>);

impl LineSink for Lines {
    fn write_line(&self, line: String) {
        self.0.lock().unwrap().push(line);
    }
}

#[test]
fn notification_envelope_has_no_id() {
    let value = Notification::message(NotificationKind::Log, "Logged in as Alice").to_value();

    assert_eq!(
        value,
        json!({
            "jsonrpc": "2.0",
            "method": "notification",
            "params": {"type": "log", "message": "Logged in as Alice"}
        })
    );
    assert!(value.get("id").is_none());
}

#[test]
fn extra_fields_are_carried_in_params() {
    let value = Notification::new(NotificationKind::NewMessage)
        .with("account_id", "acct")
        .with("peer_id", "5001")
        .with("message_id", 9)
        .to_value();

    assert_eq!(value["params"]["type"], json!("new_message"));
    assert_eq!(value["params"]["account_id"], json!("acct"));
    assert_eq!(value["params"]["message_id"], json!(9));
}

#[test]
fn notifier_writes_one_line_per_notification() {
    let lines = Arc::new(Lines::default());
    let notifier = Notifier::new(Arc::clone(&lines) as Arc<dyn LineSink>);

    notifier.log("a");
    notifier.debug("b");
    notifier.error("c");

    let written: Vec<Value> = lines
        .0
        .lock()
        .unwrap()
        .iter()
        .map(|line| serde_json::from_str(line).expect("json"))
        .collect();
    let kinds: Vec<&str> = written
        .iter()
        .map(|value| value["params"]["type"].as_str().expect("type"))
        .collect();
    assert_eq!(kinds, vec!["log", "debug", "error"]);
}

#[test]
fn kind_wire_names() {
    assert_eq!(NotificationKind::Log.as_str(), "log");
    assert_eq!(NotificationKind::Debug.as_str(), "debug");
    assert_eq!(NotificationKind::Error.as_str(), "error");
    assert_eq!(NotificationKind::Sync.as_str(), "sync");
    assert_eq!(NotificationKind::NewMessage.as_str(), "new_message");
}

#[test]
fn short_id_keeps_first_eight_chars() {
    assert_eq!(short_id("acct-0001-aaaa"), "acct-000");
    assert_eq!(short_id("abc"), "abc");
}

#[test]
fn truncate_counts_chars_not_bytes() {
    assert_eq!(truncate("héllo wörld", 5), "héllo");
    assert_eq!(truncate("hi", 30), "hi");
}
