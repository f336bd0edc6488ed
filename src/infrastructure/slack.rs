//! Slack Web API 客户端
//!
//! 通过 `chat.postMessage` 把回复发回频道

use serde::{Deserialize, Serialize};

use crate::errors::{BridgeError, Result};

/// 默认 API 地址
pub const DEFAULT_API_BASE: &str = "https://slack.com/api";

#[derive(Serialize)]
struct PostMessage<'a> {
    channel: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_ts: Option<&'a str>,
}

#[derive(Deserialize)]
struct PostMessageResponse {
    ok: bool,
    error: Option<String>,
    ts: Option<String>,
}

/// Slack 客户端
#[derive(Clone)]
pub struct SlackClient {
    bot_token: String,
    api_base: String,
    http: reqwest::Client,
}

impl SlackClient {
    pub fn new(bot_token: impl Into<String>, api_base: &str) -> Self {
        Self {
            bot_token: bot_token.into(),
            api_base: api_base.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// 发送消息，返回消息时间戳
    pub async fn post_message(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<Option<String>> {
        let body = PostMessage {
            channel,
            text,
            thread_ts,
        };

        let res: PostMessageResponse = self
            .http
            .post(format!("{}/chat.postMessage", self.api_base))
            .bearer_auth(&self.bot_token)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !res.ok {
            return Err(BridgeError::Channel(format!(
                "slack chat.postMessage failed: {}",
                res.error.unwrap_or_else(|| "unknown error".to_string())
            )));
        }
        Ok(res.ts)
    }
}
