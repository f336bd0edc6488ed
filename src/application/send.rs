//! 主动发送短信或 iMessage
//!
//! 不经过 webhook，直接通过 Twilio 或 Sendblue 给号码（或群聊）发一条消息

use tracing::info;

use crate::config::SendVia;
use crate::errors::{BridgeError, Result};
use crate::infrastructure::sendblue::SendblueClient;
use crate::infrastructure::twilio::TwilioClient;

/// 一次主动发送
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub via: SendVia,
    pub to: Vec<String>,
    pub group_id: Option<String>,
    pub body: String,
}

/// 逐个号码发短信，返回消息 SID
pub async fn send_sms(twilio: &TwilioClient, to: &[String], body: &str) -> Result<Vec<String>> {
    let mut sids = Vec::with_capacity(to.len());
    for number in to {
        let sid = twilio.send_message(number, body).await?;
        info!("Sent message to {} (SID: {})", number, sid);
        sids.push(sid);
    }
    Ok(sids)
}

/// 发送 iMessage，返回涉及的号码或群组 ID
///
/// - 指定群组：先把 `to` 中的号码加入群组，再向群组发消息
/// - 多个号码：新建群聊并发出第一条消息
/// - 单个号码：直接发送
pub async fn send_imessage(
    sendblue: &SendblueClient,
    to: &[String],
    group_id: Option<&str>,
    body: &str,
) -> Result<Vec<String>> {
    if let Some(group) = group_id.filter(|g| !g.is_empty()) {
        for number in to {
            sendblue.add_to_group(group, number).await?;
        }
        if !body.is_empty() {
            sendblue.send_message("", body, Some(group)).await?;
        }
        return Ok(vec![group.to_string()]);
    }

    match to {
        [] => Err(BridgeError::Validation("no recipient given".to_string())),
        [number] => {
            sendblue.send_message(number, body, None).await?;
            Ok(vec![number.clone()])
        }
        numbers => {
            let body = Some(body).filter(|b| !b.is_empty());
            let group = sendblue.create_group(numbers, body, None).await?;
            Ok(vec![group])
        }
    }
}

/// 按渠道分发；对应渠道未配置时返回配置错误
pub async fn send(
    outbound: &Outbound,
    twilio: Option<&TwilioClient>,
    sendblue: Option<&SendblueClient>,
) -> Result<Vec<String>> {
    match outbound.via {
        SendVia::Sms => {
            let twilio = twilio
                .ok_or_else(|| BridgeError::Config("Twilio is not configured".to_string()))?;
            if outbound.to.is_empty() {
                return Err(BridgeError::Validation("no recipient given".to_string()));
            }
            send_sms(twilio, &outbound.to, &outbound.body).await
        }
        SendVia::Imessage => {
            let sendblue = sendblue
                .ok_or_else(|| BridgeError::Config("Sendblue is not configured".to_string()))?;
            send_imessage(
                sendblue,
                &outbound.to,
                outbound.group_id.as_deref(),
                &outbound.body,
            )
            .await
        }
    }
}
