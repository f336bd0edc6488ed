//! 主动发送测试

mod common;

use axum::http::StatusCode;
use serde_json::json;
use shapes_bridge::application::send::{self, Outbound};
use shapes_bridge::config::SendVia;
use shapes_bridge::infrastructure::sendblue::SendblueClient;
use shapes_bridge::infrastructure::twilio::TwilioClient;
use shapes_bridge::BridgeError;

use common::MockUpstream;

fn outbound(via: SendVia, to: &[&str], group_id: Option<&str>, body: &str) -> Outbound {
    Outbound {
        via,
        to: to.iter().map(|n| n.to_string()).collect(),
        group_id: group_id.map(str::to_string),
        body: body.to_string(),
    }
}

#[tokio::test]
async fn test_sms_to_each_number() {
    common::setup();
    let upstream =
        MockUpstream::start(|_| (StatusCode::CREATED, json!({"sid": "SM1"}).to_string())).await;
    let twilio = TwilioClient::new("AC1", "token", "+19990000", &upstream.base_url);

    let ids = send::send(
        &outbound(SendVia::Sms, &["+15550001", "+15550002"], None, "reminder"),
        Some(&twilio),
        None,
    )
    .await
    .unwrap();
    assert_eq!(ids, vec!["SM1", "SM1"]);

    let sent = upstream.requests_to("/Messages.json");
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].form_value("To").as_deref(), Some("+15550002"));
    assert_eq!(sent[1].form_value("Body").as_deref(), Some("reminder"));
}

#[tokio::test]
async fn test_imessage_direct_group_and_existing_group() {
    let upstream = MockUpstream::ok_json(json!({"group_id": "grp-1", "status": "QUEUED"})).await;
    let sendblue = SendblueClient::new("id", "secret", "+19990000", &upstream.base_url);

    let ids = send::send(
        &outbound(SendVia::Imessage, &["+15550001"], None, "hi"),
        None,
        Some(&sendblue),
    )
    .await
    .unwrap();
    assert_eq!(ids, vec!["+15550001"]);
    assert_eq!(upstream.requests_to("/send-message")[0].json()["number"], "+15550001");

    let ids = send::send(
        &outbound(SendVia::Imessage, &["+15550001", "+15550002"], None, "welcome"),
        None,
        Some(&sendblue),
    )
    .await
    .unwrap();
    assert_eq!(ids, vec!["grp-1"]);
    let created = upstream.requests_to("/send-group-message")[0].json();
    assert_eq!(created["numbers"], json!(["+15550001", "+15550002"]));

    send::send(
        &outbound(SendVia::Imessage, &["+15550003"], Some("grp-1"), "say hi"),
        None,
        Some(&sendblue),
    )
    .await
    .unwrap();
    let modified = upstream.requests_to("/modify-group");
    assert_eq!(modified[0].json()["number"], "+15550003");
    let group_messages = upstream.requests_to("/send-group-message");
    assert_eq!(group_messages.len(), 2);
    assert_eq!(group_messages[1].json()["group_id"], "grp-1");
    assert_eq!(group_messages[1].json()["content"], "say hi");
}

#[tokio::test]
async fn test_unconfigured_channel_is_config_error() {
    let err = send::send(&outbound(SendVia::Sms, &["+15550001"], None, "hi"), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::Config(_)));

    let upstream = MockUpstream::ok_json(json!({})).await;
    let sendblue = SendblueClient::new("id", "secret", "+19990000", &upstream.base_url);
    let err = send::send(&outbound(SendVia::Imessage, &[], None, "hi"), None, Some(&sendblue))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::Validation(_)));
    assert!(upstream.requests().is_empty());
}
