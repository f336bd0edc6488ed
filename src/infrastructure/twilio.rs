//! Twilio 短信
//!
//! 入站 webhook 的回复用 TwiML（`MessagingResponse`）直接返回；
//! 主动发送走 REST 接口。

use serde::Deserialize;
use tracing::{error, info};

use crate::errors::{BridgeError, Result};

/// 默认 API 地址
pub const DEFAULT_API_BASE: &str = "https://api.twilio.com";

/// TwiML 回复
#[derive(Debug, Default, Clone)]
pub struct MessagingResponse {
    messages: Vec<String>,
}

impl MessagingResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条回复消息
    pub fn message(mut self, body: impl Into<String>) -> Self {
        self.messages.push(body.into());
        self
    }

    /// 渲染为 TwiML 文档
    pub fn render(&self) -> String {
        let mut xml = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><Response>"#);
        for body in &self.messages {
            xml.push_str("<Message>");
            xml.push_str(&escape_xml(body));
            xml.push_str("</Message>");
        }
        xml.push_str("</Response>");
        xml
    }
}

impl std::fmt::Display for MessagingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

/// XML 文本转义
pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[derive(Deserialize)]
struct MessageResource {
    sid: String,
}

/// Twilio REST 客户端
#[derive(Clone)]
pub struct TwilioClient {
    account_sid: String,
    auth_token: String,
    from_number: String,
    api_base: String,
    http: reqwest::Client,
}

impl TwilioClient {
    pub fn new(
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
        from_number: impl Into<String>,
        api_base: &str,
    ) -> Self {
        Self {
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            from_number: from_number.into(),
            api_base: api_base.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// 主动发送短信，返回消息 SID
    pub async fn send_message(&self, to: &str, body: &str) -> Result<String> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_base, self.account_sid
        );
        let form = [("To", to), ("From", self.from_number.as_str()), ("Body", body)];

        let res = self
            .http
            .post(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            error!("Error sending message: {} {}", status, text);
            return Err(BridgeError::Channel(format!("twilio returned {}: {}", status, text)));
        }

        let resource: MessageResource = res.json().await?;
        info!("Sent message to {} (SID: {})", to, resource.sid);
        Ok(resource.sid)
    }
}
