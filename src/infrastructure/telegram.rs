//! Telegram Bot API 客户端
//!
//! 只覆盖机器人需要的几个方法：getMe、getUpdates（长轮询）、sendMessage、sendChatAction

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{BridgeError, Result};

/// 默认 API 地址
pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl User {
    /// 日志中使用的用户描述
    pub fn identifier(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if !self.first_name.is_empty() {
            parts.push(self.first_name.clone());
        }
        if let Some(last) = self.last_name.as_deref().filter(|s| !s.is_empty()) {
            parts.push(last.to_string());
        }
        if let Some(username) = self.username.as_deref().filter(|s| !s.is_empty()) {
            parts.push(format!("@{}", username));
        }

        if parts.is_empty() {
            format!("User ID: {}", self.id)
        } else {
            format!("{} (ID: {})", parts.join(" "), self.id)
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Chat {
    pub fn is_private(&self) -> bool {
        self.kind == "private"
    }

    pub fn is_group(&self) -> bool {
        self.kind == "group" || self.kind == "supergroup"
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MessageEntity {
    #[serde(rename = "type")]
    pub kind: String,
    pub offset: usize,
    pub length: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Message {
    pub message_id: i64,
    pub message_thread_id: Option<i64>,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
    #[serde(default)]
    pub entities: Vec<MessageEntity>,
    pub reply_to_message: Option<Box<Message>>,
    pub photo: Option<serde_json::Value>,
    pub video: Option<serde_json::Value>,
    pub document: Option<serde_json::Value>,
    pub voice: Option<serde_json::Value>,
    pub audio: Option<serde_json::Value>,
}

impl Message {
    /// 是否带有图片、视频、文件或语音
    pub fn has_media(&self) -> bool {
        self.photo.is_some()
            || self.video.is_some()
            || self.document.is_some()
            || self.voice.is_some()
            || self.audio.is_some()
    }

    /// 按实体偏移截取文本
    ///
    /// Telegram 的偏移以 UTF-16 码元计
    pub fn entity_text(&self, entity: &MessageEntity) -> Option<String> {
        let text = self.text.as_deref()?;
        let utf16: Vec<u16> = text.encode_utf16().collect();
        let end = entity.offset.checked_add(entity.length)?;
        let slice = utf16.get(entity.offset..end)?;
        String::from_utf16(slice).ok()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to_message_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'a str>,
}

/// Bot API 客户端
#[derive(Clone)]
pub struct TelegramApi {
    base: String,
    http: reqwest::Client,
}

impl TelegramApi {
    pub fn new(token: &str, api_base: &str) -> Self {
        Self {
            base: format!("{}/bot{}", api_base.trim_end_matches('/'), token),
            http: reqwest::Client::new(),
        }
    }

    async fn call<T, B>(&self, method: &str, body: &B, timeout: Option<Duration>) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
        B: Serialize + ?Sized,
    {
        let mut req = self
            .http
            .post(format!("{}/{}", self.base, method))
            .json(body);
        if let Some(timeout) = timeout {
            req = req.timeout(timeout);
        }

        let res: ApiResponse<T> = req.send().await?.json().await?;
        if !res.ok {
            return Err(BridgeError::Channel(format!(
                "telegram {} failed: {}",
                method,
                res.description.unwrap_or_default()
            )));
        }
        res.result.ok_or_else(|| {
            BridgeError::InvalidResponse(format!("telegram {} returned no result", method))
        })
    }

    /// 获取机器人自身信息
    pub async fn get_me(&self) -> Result<User> {
        self.call("getMe", &serde_json::json!({}), None).await
    }

    /// 长轮询获取更新
    pub async fn get_updates(&self, offset: Option<i64>, timeout_secs: u64) -> Result<Vec<Update>> {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message"],
        });
        let updates: Vec<Update> = self
            .call(
                "getUpdates",
                &body,
                Some(Duration::from_secs(timeout_secs + 10)),
            )
            .await?;
        debug!("Received {} updates", updates.len());
        Ok(updates)
    }

    /// 发送文本消息
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
        markdown: bool,
    ) -> Result<Message> {
        let body = SendMessage {
            chat_id,
            text,
            reply_to_message_id: reply_to,
            parse_mode: markdown.then_some("Markdown"),
        };
        self.call("sendMessage", &body, None).await
    }

    /// 发送“正在输入”等状态
    pub async fn send_chat_action(&self, chat_id: i64, action: &str) -> Result<bool> {
        let body = serde_json::json!({ "chat_id": chat_id, "action": action });
        self.call("sendChatAction", &body, None).await
    }
}
