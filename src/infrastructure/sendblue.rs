//! Sendblue iMessage 客户端
//!
//! 单聊走 `send-message`，群聊走 `send-group-message`；
//! 回复里如果带 files.shapes.inc 的链接，就把它作为 `media_url` 发送。

use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{error, info};

use crate::core::shape::detect_shapes_file_url;
use crate::errors::{BridgeError, Result};

/// 默认 API 地址
pub const DEFAULT_API_BASE: &str = "https://api.sendblue.co/api";

#[derive(Deserialize)]
struct GroupCreated {
    group_id: Option<String>,
}

/// Sendblue 客户端
#[derive(Clone)]
pub struct SendblueClient {
    api_key_id: String,
    api_secret_key: String,
    from_number: String,
    api_base: String,
    http: reqwest::Client,
}

/// 构造发送消息的请求体，返回 (端点, 请求体)
pub fn build_send_payload(
    from_number: &str,
    to: &str,
    body: &str,
    group_id: Option<&str>,
) -> (&'static str, Value) {
    let mut payload = Map::new();
    payload.insert("from_number".into(), json!(from_number));

    let endpoint = match group_id.filter(|g| !g.is_empty()) {
        Some(group) => {
            payload.insert("group_id".into(), json!(group));
            "send-group-message"
        }
        None => {
            payload.insert("number".into(), json!(to));
            "send-message"
        }
    };

    match detect_shapes_file_url(body) {
        Some(url) => {
            let text = body.replace(url, "");
            let text = text.trim();
            payload.insert("media_url".into(), json!(url));
            if !text.is_empty() {
                payload.insert("content".into(), json!(text));
            }
        }
        None => {
            payload.insert("content".into(), json!(body));
        }
    }

    (endpoint, Value::Object(payload))
}

impl SendblueClient {
    pub fn new(
        api_key_id: impl Into<String>,
        api_secret_key: impl Into<String>,
        from_number: impl Into<String>,
        api_base: &str,
    ) -> Self {
        Self {
            api_key_id: api_key_id.into(),
            api_secret_key: api_secret_key.into(),
            from_number: from_number.into(),
            api_base: api_base.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    async fn post(&self, endpoint: &str, payload: &Value) -> Result<Value> {
        let res = self
            .http
            .post(format!("{}/{}", self.api_base, endpoint))
            .header("sb-api-key-id", &self.api_key_id)
            .header("sb-api-secret-key", &self.api_secret_key)
            .json(payload)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(BridgeError::Channel(format!(
                "sendblue {} returned {}: {}",
                endpoint, status, text
            )));
        }
        Ok(res.json().await?)
    }

    /// 发送 iMessage，群聊时 `group_id` 优先
    pub async fn send_message(
        &self,
        to: &str,
        body: &str,
        group_id: Option<&str>,
    ) -> Result<Value> {
        let (endpoint, payload) = build_send_payload(&self.from_number, to, body, group_id);
        match group_id.filter(|g| !g.is_empty()) {
            Some(group) => info!("Preparing to send to group {}", group),
            None => info!("Preparing to send to {}", to),
        }
        self.post(endpoint, &payload).await.inspect_err(|e| {
            error!("Error sending iMessage: {}", e);
        })
    }

    /// 发送“正在输入”提示，只对单聊有效
    ///
    /// 失败只记录日志，不影响后续回复
    pub async fn send_typing_indicator(&self, to: &str) {
        match self.post("send-typing-indicator", &json!({ "number": to })).await {
            Ok(_) => info!("Sent typing indicator to {}", to),
            Err(e) => error!("Error sending typing indicator: {}", e),
        }
    }

    /// 新建群聊，返回群组 ID
    pub async fn create_group(
        &self,
        numbers: &[String],
        body: Option<&str>,
        media_url: Option<&str>,
    ) -> Result<String> {
        if body.is_none() && media_url.is_none() {
            return Err(BridgeError::Validation(
                "Either body or media_url must be provided to create a group".to_string(),
            ));
        }

        let mut payload = json!({
            "numbers": numbers,
            "from_number": self.from_number,
        });
        if let Some(body) = body {
            payload["content"] = json!(body);
        }
        if let Some(media_url) = media_url {
            payload["media_url"] = json!(media_url);
        }

        let value = self.post("send-group-message", &payload).await?;
        let created: GroupCreated = serde_json::from_value(value)?;
        let group_id = created.group_id.ok_or_else(|| {
            BridgeError::InvalidResponse("Failed to extract group_id from Sendblue response".into())
        })?;

        info!("Created group {} with members {:?}", group_id, numbers);
        Ok(group_id)
    }

    /// 把号码加入已有群聊
    pub async fn add_to_group(&self, group_id: &str, number: &str) -> Result<Value> {
        let payload = json!({
            "group_id": group_id,
            "modify_type": "add_recipient",
            "number": number,
        });
        let value = self.post("modify-group", &payload).await?;
        info!("Added {} to group {}", number, group_id);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_text_payload() {
        let (endpoint, payload) = build_send_payload("+1000", "+1555", "hello", None);
        assert_eq!(endpoint, "send-message");
        assert_eq!(
            payload,
            json!({"from_number": "+1000", "number": "+1555", "content": "hello"})
        );
    }

    #[test]
    fn test_group_payload_ignores_number() {
        let (endpoint, payload) = build_send_payload("+1000", "+1555", "hello", Some("grp"));
        assert_eq!(endpoint, "send-group-message");
        assert_eq!(payload["group_id"], "grp");
        assert!(payload.get("number").is_none());
    }

    #[test]
    fn test_empty_group_id_is_direct() {
        let (endpoint, _) = build_send_payload("+1000", "+1555", "hello", Some(""));
        assert_eq!(endpoint, "send-message");
    }

    #[test]
    fn test_media_url_extracted() {
        let body = "here you go https://files.shapes.inc/a/b.png";
        let (_, payload) = build_send_payload("+1000", "+1555", body, None);
        assert_eq!(payload["media_url"], "https://files.shapes.inc/a/b.png");
        assert_eq!(payload["content"], "here you go");

        let (_, only_media) =
            build_send_payload("+1000", "+1555", "https://files.shapes.inc/x.mp3", None);
        assert!(only_media.get("content").is_none());
    }
}
