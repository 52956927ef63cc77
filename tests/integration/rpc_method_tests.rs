//! Wire-level tests of the method table, driven through the dispatcher.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use chat_bridge::driver::memory::DEFAULT_LOGIN_CODE;
use chat_bridge::notify::LineSink;
use chat_bridge::rpc::dispatcher::Dispatcher;
use chat_bridge::rpc::methods::BridgeMethods;

use super::test_helpers::{harness, CaptureSink, Harness, ACCOUNT, ALICE_PHONE, BOB_PASSWORD, BOB_PHONE};

/// Send one request and return its full response object.
async fn call(h: &Harness, method: &str, params: Value) -> Value {
    let output = Arc::new(CaptureSink::default());
    let dispatcher = Dispatcher::new(
        Arc::new(BridgeMethods::new(Arc::clone(&h.supervisor))),
        Arc::clone(&output) as Arc<dyn LineSink>,
        4,
    );
    let line = format!(
        "{}\n",
        json!({ "jsonrpc": "2.0", "method": method, "params": params, "id": 1 })
    );
    dispatcher
        .serve(line.as_bytes(), CancellationToken::new())
        .await
        .expect("serve");
    let mut responses = output.responses();
    assert_eq!(responses.len(), 1, "exactly one response");
    responses.remove(0)
}

async fn result(h: &Harness, method: &str, params: Value) -> Value {
    let response = call(h, method, params).await;
    assert_eq!(response["jsonrpc"], json!("2.0"));
    assert_eq!(response["id"], json!(1));
    response
        .get("result")
        .cloned()
        .unwrap_or_else(|| panic!("expected result, got {response}"))
}

#[tokio::test]
async fn ping_answers_pong() {
    let h = harness(None).await;

    assert_eq!(result(&h, "ping", json!({})).await, json!({ "pong": true }));
}

#[tokio::test]
async fn login_and_verify_over_rpc() {
    let h = harness(None).await;

    let login = result(&h, "login", json!({ "phone": ALICE_PHONE, "account_id": ACCOUNT })).await;
    assert_eq!(login["needs_code"], json!(true));
    let token = login["correlation_token"].as_str().expect("token").to_owned();

    let verified = result(
        &h,
        "verify_code",
        json!({
            "phone": ALICE_PHONE,
            "code": DEFAULT_LOGIN_CODE,
            "phone_code_hash": token,
            "account_id": ACCOUNT,
        }),
    )
    .await;

    assert_eq!(verified["name"], json!("Alice Liddell"));
    assert_eq!(verified["username"], json!("alice"));
    assert_eq!(verified["user_id"], json!("101"));
    assert!(verified["credential_string"].as_str().is_some_and(|c| !c.is_empty()));
}

#[tokio::test]
async fn second_factor_over_rpc() {
    let h = harness(None).await;
    let login = result(&h, "login", json!({ "phone": BOB_PHONE, "account_id": ACCOUNT })).await;
    let token = login["correlation_token"].clone();
    let mut params = json!({
        "phone": BOB_PHONE,
        "code": DEFAULT_LOGIN_CODE,
        "correlation_token": token,
        "account_id": ACCOUNT,
    });

    assert_eq!(result(&h, "verify_code", params.clone()).await, json!({ "needs_2fa": true }));

    params["password"] = json!(BOB_PASSWORD);
    let verified = result(&h, "verify_code", params).await;
    assert_eq!(verified["username"], json!("bob"));
}

#[tokio::test]
async fn verify_without_login_is_operation_error() {
    let h = harness(None).await;

    let response = call(
        &h,
        "verify_code",
        json!({ "phone": ALICE_PHONE, "code": "1", "correlation_token": "x", "account_id": ACCOUNT }),
    )
    .await;

    assert_eq!(response["error"]["code"], json!(-32000));
    assert_eq!(
        response["error"]["message"],
        json!("No pending login for this account")
    );
}

#[tokio::test]
async fn missing_params_are_rejected() {
    let h = harness(None).await;

    let response = call(&h, "login", json!({ "phone": ALICE_PHONE })).await;

    assert_eq!(response["error"]["code"], json!(-32000));
    assert!(response["error"]["message"]
        .as_str()
        .is_some_and(|m| m.starts_with("invalid params")));
}

#[tokio::test]
async fn connect_with_session_reports_success_and_expiry() {
    let h = harness(None).await;
    let credential = h.network.issue_credential(ALICE_PHONE).expect("credential");

    let ok = result(
        &h,
        "connect_with_session",
        json!({ "account_id": ACCOUNT, "session_string": credential }),
    )
    .await;
    assert_eq!(ok, json!({ "success": true, "name": "Alice Liddell", "username": "alice" }));

    h.network.revoke_credential(&credential);
    let expired = result(
        &h,
        "connect_with_session",
        json!({ "account_id": "acct-other", "credential_string": credential }),
    )
    .await;
    assert_eq!(expired["success"], json!(false));
}

#[tokio::test]
async fn connect_with_bad_credential_is_not_an_rpc_error() {
    let h = harness(None).await;

    let response = result(
        &h,
        "connect_with_session",
        json!({ "account_id": ACCOUNT, "credential_string": "" }),
    )
    .await;

    assert_eq!(response["success"], json!(false));
    assert!(response["error"].is_string());
}

#[tokio::test]
async fn disconnect_unknown_account() {
    let h = harness(None).await;

    let response = result(&h, "disconnect", json!({ "account_id": ACCOUNT })).await;

    assert_eq!(response, json!({ "success": false, "error": "Client not found" }));
}

#[tokio::test]
async fn reads_and_sends_over_rpc() {
    let h = harness(None).await;
    h.login_alice().await;

    let sent = result(
        &h,
        "send_message",
        json!({ "account_id": ACCOUNT, "peer_id": 5001, "text": "numeric peer" }),
    )
    .await;
    assert_eq!(sent["success"], json!(true));
    assert!(sent["message_id"].is_i64());

    let messages = result(
        &h,
        "fetch_messages",
        json!({ "account_id": ACCOUNT, "peer_id": "5001" }),
    )
    .await;
    assert_eq!(messages.as_array().map(Vec::len), Some(1));
    assert_eq!(messages[0]["text"], json!("numeric peer"));

    let dialogs = result(&h, "get_dialogs", json!({ "account_id": ACCOUNT })).await;
    assert!(dialogs.is_array());
}

#[tokio::test]
async fn send_without_session_is_unsuccessful_result() {
    let h = harness(None).await;

    let response = result(
        &h,
        "send_message",
        json!({ "account_id": ACCOUNT, "peer_id": "5001", "text": "hi" }),
    )
    .await;

    assert_eq!(response, json!({ "success": false, "error": "Client not connected" }));
}

#[tokio::test]
async fn unknown_method_over_method_table() {
    let h = harness(None).await;

    let response = call(&h, "teleport", json!({})).await;

    assert_eq!(response["error"]["code"], json!(-32601));
    assert_eq!(response["error"]["message"], json!("Method not found: teleport"));
}
