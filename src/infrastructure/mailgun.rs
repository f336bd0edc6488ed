//! Mailgun 发信客户端
//!
//! 回复邮件时带上 `In-Reply-To` / `References` / `Message-ID` 头，
//! 让邮件客户端把回复归到同一个会话里。

use tracing::{error, info};
use uuid::Uuid;

use crate::errors::{BridgeError, Result};

/// 一封待发送的回复
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutboundReply {
    pub from_name: String,
    pub from_email: String,
    pub to_email: String,
    pub cc: Vec<String>,
    pub subject: String,
    pub text: String,
    /// 被回复邮件的 Message-Id
    pub in_reply_to: String,
    pub references: String,
    pub message_id: String,
}

/// 新的 `<uuid@domain>` 形式 Message-ID
pub fn new_message_id(domain: &str) -> String {
    format!("<{}@{}>", Uuid::new_v4(), domain)
}

/// 在 References 末尾追加被回复邮件的 ID
pub fn updated_references(references: &str, message_id: &str) -> String {
    match (references.is_empty(), message_id.is_empty()) {
        (_, true) => references.to_string(),
        (true, false) => message_id.to_string(),
        (false, false) => format!("{} {}", references, message_id),
    }
}

/// Mailgun 客户端
#[derive(Clone)]
pub struct MailgunClient {
    api_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl MailgunClient {
    /// `api_url` 是完整的发信地址，例如 `https://api.mailgun.net/v3/{domain}/messages`
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: api_key.into(),
            http: reqwest::Client::new(),
        }
    }

    async fn post_form(&self, form: &[(&str, String)]) -> Result<()> {
        let res = self
            .http
            .post(&self.api_url)
            .basic_auth("api", Some(&self.api_key))
            .form(form)
            .send()
            .await?;

        let status = res.status();
        info!("Mailgun responded with {}", status);
        if status.as_u16() != 200 {
            let body = res.text().await.unwrap_or_default();
            error!("mailgun failed: {} {}", status, body);
            return Err(BridgeError::Channel(format!("mailgun failed with status {}", status)));
        }
        Ok(())
    }

    /// 发送会话内回复
    pub async fn send_reply(&self, reply: &OutboundReply) -> Result<()> {
        let mut form: Vec<(&str, String)> = vec![
            ("from", format!("{} <{}>", reply.from_name, reply.from_email)),
            ("to", reply.to_email.clone()),
        ];
        form.extend(reply.cc.iter().map(|cc| ("cc", cc.clone())));
        form.extend([
            ("subject", reply.subject.clone()),
            ("text", reply.text.clone()),
            ("h:In-Reply-To", reply.in_reply_to.clone()),
            ("h:References", reply.references.clone()),
            ("h:Message-ID", reply.message_id.clone()),
        ]);

        self.post_form(&form).await
    }

    /// 以 shape 的名义发送一封新邮件（不属于任何会话）
    pub async fn send_shape_email(
        &self,
        shape_username: &str,
        domain: &str,
        recipient_email: &str,
        cc: &[String],
        subject: &str,
        body: &str,
    ) -> Result<()> {
        let mut form: Vec<(&str, String)> = vec![
            ("from", format!("{} <{}@{}>", shape_username, shape_username, domain)),
            ("to", recipient_email.to_string()),
        ];
        form.extend(cc.iter().map(|c| ("cc", c.clone())));
        form.extend([
            ("subject", subject.to_string()),
            ("text", body.to_string()),
            ("h:Message-ID", new_message_id(domain)),
        ]);

        self.post_form(&form).await
    }

    /// 下载 Mailgun 存储的附件
    pub async fn download_attachment(&self, url: &str) -> Result<Vec<u8>> {
        let res = self
            .http
            .get(url)
            .basic_auth("api", Some(&self.api_key))
            .send()
            .await?;

        let status = res.status();
        if status.as_u16() != 200 {
            return Err(BridgeError::Api {
                status: status.as_u16(),
                body: res.text().await.unwrap_or_default(),
            });
        }
        Ok(res.bytes().await?.to_vec())
    }
}
