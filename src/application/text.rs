//! 短信与 iMessage 适配器
//!
//! `/sms` 接收 Twilio 表单并直接以 TwiML 回复；`/imsg` 接收 Sendblue JSON，
//! 回复通过 Sendblue API 单独发送。两者共用接线台的人设选择逻辑。

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Form, Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::core::switchboard::{
    auto_connected_message, connected_message, greeting, LinkStyle, Route, Switchboard,
};
use crate::errors::{BridgeError, Result};
use crate::infrastructure::sendblue::SendblueClient;
use crate::infrastructure::shapes::{ChatBackend, CompletionRequest};
use crate::infrastructure::twilio::MessagingResponse;
use crate::infrastructure::web::{health_check, ErrorResponse};

/// 短信处理失败时的回复
pub const SMS_ERROR_MESSAGE: &str = "Sorry, I'm having trouble processing your message right now.";

// ==================== 请求类型 ====================

/// Sendblue 回调
#[derive(Debug, Clone, Deserialize)]
pub struct InboundImessage {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub from_number: String,
    #[serde(default)]
    pub to_number: String,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub is_outbound: bool,
}

// ==================== 状态 ====================

#[derive(Clone)]
pub struct TextState {
    pub backend: Arc<dyn ChatBackend>,
    pub switchboard: Switchboard,
    pub sendblue: Option<SendblueClient>,
}

/// 用户号码作为 X-User-Id，群组 ID 作为 X-Channel-Id
fn request_for(shape: &str, text: &str, user: &str, group_id: Option<&str>) -> CompletionRequest {
    let request = CompletionRequest::single(shape, text).user(user);
    match group_id {
        Some(group) => request.channel(group),
        None => request,
    }
}

fn twiml(body: String) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/xml")], body)
}

/// 处理一条短信，返回要发回的文本
pub async fn sms_reply_text(
    state: &TextState,
    body: &str,
    from: &str,
    group_sid: Option<&str>,
) -> Result<String> {
    info!("Received message from {}", from);
    let chat_id = group_sid.unwrap_or(from);

    let text = match state.switchboard.route(chat_id, body).await? {
        Route::Connected(shape) => connected_message(&shape),
        Route::Greeting => {
            info!("Sent operator message to {}", from);
            greeting(LinkStyle::Bare)
        }
        Route::AutoConnected(shape) => {
            let reply = state
                .backend
                .complete(request_for(&shape, body, from, group_sid))
                .await?;
            info!("Auto-connected {} to {} and sent response", chat_id, shape);
            format!("{}\n\n{}", auto_connected_message(&shape), reply)
        }
        Route::Reply(shape) => {
            let reply = state
                .backend
                .complete(request_for(&shape, body, from, group_sid))
                .await?;
            info!("Sent response from {} to {}", shape, from);
            reply
        }
    };
    Ok(text)
}

async fn sms_reply(state: &TextState, fields: HashMap<String, String>) -> impl IntoResponse {
    let body = fields.get("Body").map(String::as_str);
    let from = fields.get("From").map(String::as_str);
    let group = fields
        .get("GroupSid")
        .map(String::as_str)
        .filter(|g| !g.is_empty());

    let result = match (body, from) {
        (Some(body), Some(from)) => sms_reply_text(state, body, from, group).await,
        _ => Err(BridgeError::Validation("missing Body or From".to_string())),
    };

    let text = result.unwrap_or_else(|e| {
        error!("Error processing SMS: {}", e);
        SMS_ERROR_MESSAGE.to_string()
    });
    twiml(MessagingResponse::new().message(text).render())
}

async fn sms_post(
    State(state): State<Arc<TextState>>,
    Form(fields): Form<HashMap<String, String>>,
) -> impl IntoResponse {
    sms_reply(&state, fields).await
}

async fn sms_get(
    State(state): State<Arc<TextState>>,
    Query(fields): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    sms_reply(&state, fields).await
}

/// 处理一条 iMessage 回调
pub async fn handle_imessage(state: &TextState, inbound: &InboundImessage) -> Result<()> {
    if inbound.content.is_empty() {
        info!("Empty message received");
        return Ok(());
    }
    let preview: String = inbound.content.chars().take(50).collect();
    info!("Received message from {}: {}...", inbound.from_number, preview);

    if inbound.is_outbound {
        info!("Skipping outbound message");
        return Ok(());
    }

    let sendblue = state
        .sendblue
        .as_ref()
        .ok_or_else(|| BridgeError::Config("Sendblue is not configured".to_string()))?;

    let user = inbound.from_number.as_str();
    let group_id = inbound.group_id.as_deref().filter(|g| !g.is_empty());
    let chat_id = group_id.unwrap_or(user);

    match state.switchboard.route(chat_id, &inbound.content).await? {
        Route::Connected(shape) => {
            sendblue
                .send_message(user, &connected_message(&shape), group_id)
                .await?;
        }
        Route::AutoConnected(shape) => {
            sendblue
                .send_message(user, &auto_connected_message(&shape), group_id)
                .await?;
            info!("Auto-connected {} to {} and sent response", chat_id, shape);
        }
        Route::Greeting => {
            sendblue
                .send_message(user, &greeting(LinkStyle::Https), group_id)
                .await?;
        }
        Route::Reply(shape) => {
            if group_id.is_none() {
                sendblue.send_typing_indicator(user).await;
            }
            let reply = state
                .backend
                .complete(request_for(&shape, &inbound.content, user, group_id))
                .await?;
            sendblue.send_message(user, &reply, group_id).await?;
            info!("Sent response from {} to {}", shape, user);
        }
    }
    Ok(())
}

async fn imsg_reply(state: &TextState, inbound: InboundImessage) -> axum::response::Response {
    match handle_imessage(state, &inbound).await {
        Ok(()) => Json(json!({ "status": "success" })).into_response(),
        Err(e) => {
            error!("Error processing iMessage: {}", e);
            ErrorResponse::new(e.to_string()).into_response()
        }
    }
}

async fn imsg_post(
    State(state): State<Arc<TextState>>,
    Json(inbound): Json<InboundImessage>,
) -> impl IntoResponse {
    imsg_reply(&state, inbound).await
}

async fn imsg_get(
    State(state): State<Arc<TextState>>,
    Query(inbound): Query<InboundImessage>,
) -> impl IntoResponse {
    imsg_reply(&state, inbound).await
}

/// 创建路由
pub fn create_router(state: TextState) -> Router {
    Router::new()
        .route("/sms", get(sms_get).post(sms_post))
        .route("/imsg", get(imsg_get).post(imsg_post))
        .route("/health", get(health_check))
        .with_state(Arc::new(state))
}
