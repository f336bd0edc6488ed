//! Telegram 机器人测试（假 Bot API）

mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::{json, Value};
use shapes_bridge::application::telegram::{BotSettings, TelegramBot, MEDIA_RESPONSE};
use shapes_bridge::core::access::AccessManager;
use shapes_bridge::errors::RATE_LIMIT_MESSAGE;
use shapes_bridge::infrastructure::telegram::{Message, TelegramApi, User};

use common::{FakeBackend, MockUpstream};

const BOT_ID: i64 = 1000;

fn bot_user() -> User {
    serde_json::from_value(json!({"id": BOT_ID, "is_bot": true, "first_name": "Tenshi", "username": "tenshi_bot"}))
        .unwrap()
}

/// sendMessage 原样回显；`reject_markdown` 时拒绝带 parse_mode 的请求
async fn bot_api(reject_markdown: bool) -> MockUpstream {
    MockUpstream::start(move |req| {
        if req.path.ends_with("/getMe") {
            return (StatusCode::OK, json!({"ok": true, "result": bot_user()}).to_string());
        }
        if req.path.ends_with("/sendChatAction") {
            return (StatusCode::OK, json!({"ok": true, "result": true}).to_string());
        }
        let body = req.json();
        if reject_markdown && body.get("parse_mode").is_some() {
            return (
                StatusCode::BAD_REQUEST,
                json!({"ok": false, "description": "Bad Request: can't parse entities"}).to_string(),
            );
        }
        let sent = json!({
            "message_id": 500,
            "from": bot_user(),
            "chat": {"id": body["chat_id"], "type": "private"},
            "text": body["text"],
        });
        (StatusCode::OK, json!({"ok": true, "result": sent}).to_string())
    })
    .await
}

fn bot(upstream: &MockUpstream, backend: Arc<FakeBackend>, dir: &tempfile::TempDir, access_check: bool) -> TelegramBot {
    let api = TelegramApi::new("TEST", &upstream.base_url);
    let access = AccessManager::load(dir.path().join("approved_chats.json"), "secret");
    let settings = BotSettings {
        shape: "tenshi".to_string(),
        access_check,
        context_messages: 10,
    };
    TelegramBot::new(api, backend, bot_user(), access, settings)
}

fn private_message(id: i64, text: &str) -> Message {
    serde_json::from_value(json!({
        "message_id": id,
        "from": {"id": 7, "is_bot": false, "first_name": "Ada", "username": "ada"},
        "chat": {"id": 42, "type": "private"},
        "text": text,
    }))
    .unwrap()
}

fn group_message(id: i64, extra: Value) -> Message {
    let mut value = json!({
        "message_id": id,
        "from": {"id": 8, "is_bot": false, "first_name": "Bob"},
        "chat": {"id": -100, "type": "supergroup"},
    });
    value
        .as_object_mut()
        .unwrap()
        .extend(extra.as_object().unwrap().clone());
    serde_json::from_value(value).unwrap()
}

fn sent_texts(upstream: &MockUpstream) -> Vec<String> {
    upstream
        .requests_to("/sendMessage")
        .iter()
        .map(|r| r.json()["text"].as_str().unwrap_or_default().to_string())
        .collect()
}

#[tokio::test]
async fn test_connect_reads_identity() {
    let upstream = bot_api(false).await;
    let dir = tempfile::tempdir().unwrap();
    let api = TelegramApi::new("TEST", &upstream.base_url);
    let access = AccessManager::load(dir.path().join("approved_chats.json"), "secret");
    let settings = BotSettings {
        shape: "tenshi".into(),
        access_check: true,
        context_messages: 10,
    };

    TelegramBot::connect(api, FakeBackend::replying("x"), access, settings)
        .await
        .unwrap();
    let calls = upstream.requests_to("/getMe");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].path, "/botTEST/getMe");
}

#[tokio::test]
async fn test_approval_flow_then_reply() {
    common::setup();
    let upstream = bot_api(false).await;
    let backend = FakeBackend::replying("Nice to meet you, Ada!");
    let dir = tempfile::tempdir().unwrap();
    let bot = bot(&upstream, backend.clone(), &dir, true);

    bot.handle_message(&private_message(1, "hello")).await.unwrap();
    assert!(sent_texts(&upstream)[0].contains("You need to approve this chat first"));
    assert!(backend.requests().is_empty());

    bot.handle_message(&private_message(2, "@tenshi_bot giveaccess")).await.unwrap();
    bot.handle_message(&private_message(3, "42")).await.unwrap();
    bot.handle_message(&private_message(4, "wrong")).await.unwrap();
    let texts = sent_texts(&upstream);
    assert_eq!(texts[2], "Got it! Now please enter the admin password:");
    assert!(texts[3].contains("Incorrect password"));

    bot.handle_message(&private_message(5, "@tenshi_bot giveaccess")).await.unwrap();
    bot.handle_message(&private_message(6, "42")).await.unwrap();
    bot.handle_message(&private_message(7, "secret")).await.unwrap();
    let texts = sent_texts(&upstream);
    assert_eq!(
        texts.last().unwrap(),
        "Success! Chat ID 42 has been approved. The bot will now respond in that chat."
    );
    let saved = std::fs::read_to_string(dir.path().join("approved_chats.json")).unwrap();
    assert_eq!(serde_json::from_str::<Vec<i64>>(&saved).unwrap(), vec![42]);

    bot.handle_message(&private_message(8, "hello again")).await.unwrap();

    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].model, "shapesinc/tenshi");
    assert_eq!(requests[0].user_id.as_deref(), Some("7"));
    assert_eq!(requests[0].channel_id.as_deref(), Some("42"));
    assert_eq!(requests[0].max_tokens, Some(1024));
    assert_eq!(requests[0].messages.last().unwrap().content, "hello again");

    let typing = upstream.requests_to("/sendChatAction");
    assert_eq!(typing[0].json()["action"], "typing");

    let reply = upstream.requests_to("/sendMessage").pop().unwrap().json();
    assert_eq!(reply["text"], "Nice to meet you, Ada!");
    assert_eq!(reply["parse_mode"], "Markdown");
    assert_eq!(reply["reply_to_message_id"], 8);
}

#[tokio::test]
async fn test_invalid_chat_id_cancels_flow() {
    let upstream = bot_api(false).await;
    let backend = FakeBackend::replying("x");
    let dir = tempfile::tempdir().unwrap();
    let bot = bot(&upstream, backend.clone(), &dir, true);

    bot.handle_message(&private_message(1, "@tenshi_bot revoke")).await.unwrap();
    bot.handle_message(&private_message(2, "not-a-number")).await.unwrap();
    bot.handle_message(&private_message(3, "secret")).await.unwrap();

    let texts = sent_texts(&upstream);
    assert_eq!(texts.len(), 3);
    assert!(texts[2].contains("You need to approve this chat first"));
    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn test_group_requires_mention_or_reply() {
    let upstream = bot_api(false).await;
    let backend = FakeBackend::replying("I'm here");
    let dir = tempfile::tempdir().unwrap();
    let bot = bot(&upstream, backend.clone(), &dir, false);

    bot.handle_message(&group_message(1, json!({"text": "just chatting"})))
        .await
        .unwrap();
    assert!(backend.requests().is_empty());
    assert!(upstream.requests().is_empty());

    bot.handle_message(&group_message(2, json!({"text": "hey @tenshi_bot what's up"})))
        .await
        .unwrap();
    assert_eq!(backend.requests().len(), 1);

    bot.handle_message(&group_message(
        3,
        json!({
            "text": "and you?",
            "reply_to_message": {
                "message_id": 500,
                "from": {"id": BOT_ID, "is_bot": true, "first_name": "Tenshi"},
                "chat": {"id": -100, "type": "supergroup"},
                "text": "I'm here"
            }
        }),
    ))
    .await
    .unwrap();

    let requests = backend.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].user_id.as_deref(), Some("8"));
    assert_eq!(requests[1].channel_id.as_deref(), Some("-100"));
    // 群聊上下文包含未被回复的消息和机器人的回答
    let contents: Vec<&str> = requests[1].messages.iter().map(|m| m.content.as_str()).collect();
    assert!(contents.contains(&"just chatting"));
    assert!(contents.contains(&"I'm here"));
    assert_eq!(*contents.last().unwrap(), "and you?");
}

#[tokio::test]
async fn test_start_enables_auto_reply() {
    let upstream = bot_api(false).await;
    let backend = FakeBackend::replying("auto");
    let dir = tempfile::tempdir().unwrap();
    let bot = bot(&upstream, backend.clone(), &dir, false);

    bot.handle_message(&group_message(1, json!({"text": "/start@tenshi_bot"})))
        .await
        .unwrap();
    assert_eq!(
        sent_texts(&upstream),
        vec!["I'm now in auto-reply mode. I'll respond to all messages in this chat.".to_string()]
    );

    bot.handle_message(&group_message(2, json!({"text": "anyone?"})))
        .await
        .unwrap();
    assert_eq!(backend.requests().len(), 1);

    bot.handle_message(&group_message(3, json!({"text": "@tenshi_bot stop"})))
        .await
        .unwrap();
    bot.handle_message(&group_message(4, json!({"text": "quiet now"})))
        .await
        .unwrap();
    assert_eq!(backend.requests().len(), 1);
    assert!(sent_texts(&upstream)
        .last()
        .unwrap()
        .starts_with("Auto-reply mode disabled"));
}

#[tokio::test]
async fn test_media_and_rate_limit() {
    let upstream = bot_api(false).await;
    let dir = tempfile::tempdir().unwrap();
    let bot = bot(&upstream, FakeBackend::rate_limited(), &dir, false);

    let photo: Message = serde_json::from_value(json!({
        "message_id": 1,
        "from": {"id": 7, "is_bot": false, "first_name": "Ada"},
        "chat": {"id": 42, "type": "private"},
        "photo": [{"file_id": "abc", "width": 1, "height": 1}]
    }))
    .unwrap();
    bot.handle_message(&photo).await.unwrap();
    assert_eq!(sent_texts(&upstream), vec![MEDIA_RESPONSE.to_string()]);

    bot.handle_message(&private_message(2, "hi")).await.unwrap();
    assert_eq!(sent_texts(&upstream).last().unwrap(), RATE_LIMIT_MESSAGE);
}

#[tokio::test]
async fn test_markdown_rejection_falls_back_to_plain() {
    let upstream = bot_api(true).await;
    let dir = tempfile::tempdir().unwrap();
    let bot = bot(&upstream, FakeBackend::replying("snake_case *broken"), &dir, false);

    bot.handle_message(&private_message(1, "hi")).await.unwrap();

    let sends = upstream.requests_to("/sendMessage");
    assert_eq!(sends.len(), 2);
    assert_eq!(sends[0].json()["parse_mode"], "Markdown");
    assert!(sends[1].json().get("parse_mode").is_none());
    assert_eq!(sends[1].json()["text"], "snake_case *broken");
}
