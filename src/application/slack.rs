//! Slack Events API 适配器
//!
//! 先立即返回 200，再在后台任务里调用 Shapes 并把回复发回频道

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info};

use crate::infrastructure::shapes::{ChatBackend, CompletionRequest};
use crate::infrastructure::slack::SlackClient;
use crate::infrastructure::web::health_check;

// ==================== 请求类型 ====================

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlackEnvelope {
    UrlVerification { challenge: String },
    EventCallback { event: SlackEvent },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlackEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub user: Option<String>,
    pub channel: Option<String>,
    pub text: Option<String>,
    pub ts: Option<String>,
    pub thread_ts: Option<String>,
    pub bot_id: Option<String>,
    pub subtype: Option<String>,
}

impl SlackEvent {
    /// 需要回复的人类消息：(用户, 频道, 文本)
    fn human_message(&self) -> Option<(&str, &str, &str)> {
        if !matches!(self.kind.as_str(), "message" | "app_mention") {
            return None;
        }
        if self.bot_id.is_some() || self.subtype.is_some() {
            return None;
        }
        Some((
            self.user.as_deref()?,
            self.channel.as_deref()?,
            self.text.as_deref().filter(|t| !t.is_empty())?,
        ))
    }
}

// ==================== 去重 ====================

/// 记住的最近消息数
const RECENT_CAPACITY: usize = 256;

/// 最近处理过的 (频道, ts)
///
/// 同时订阅 `message` 和 `app_mention` 时，一条 @ 消息会以两个事件到达
#[derive(Debug, Default)]
pub struct RecentMessages {
    seen: Mutex<VecDeque<(String, String)>>,
}

impl RecentMessages {
    /// 第一次见到时返回 true 并记下
    pub fn first_seen(&self, channel: &str, ts: &str) -> bool {
        let Ok(mut seen) = self.seen.lock() else {
            return true;
        };
        if seen.iter().any(|(c, t)| c == channel && t == ts) {
            return false;
        }
        if seen.len() >= RECENT_CAPACITY {
            seen.pop_front();
        }
        seen.push_back((channel.to_string(), ts.to_string()));
        true
    }
}

// ==================== 状态 ====================

#[derive(Clone)]
pub struct SlackState {
    pub backend: Arc<dyn ChatBackend>,
    pub slack: SlackClient,
    pub shape: String,
}

/// 调用 Shapes，失败时把错误作为回复文本
pub async fn process_with_shapes(
    state: &SlackState,
    user: &str,
    channel: &str,
    text: &str,
) -> String {
    let request = CompletionRequest::single(&state.shape, text)
        .user(format!("slack-user-{}", user))
        .channel(format!("slack-channel-{}", channel));

    match state.backend.complete(request).await {
        Ok(reply) => reply,
        Err(e) => {
            error!("Error processing with Shapes API: {}", e);
            format!("Error processing your message: {}", e)
        }
    }
}

struct SlackApp {
    state: SlackState,
    recent: RecentMessages,
}

async fn slack_events(
    State(app): State<Arc<SlackApp>>,
    Json(envelope): Json<SlackEnvelope>,
) -> impl IntoResponse {
    match envelope {
        SlackEnvelope::UrlVerification { challenge } => {
            Json(json!({ "challenge": challenge })).into_response()
        }
        SlackEnvelope::EventCallback { event } => {
            if let Some((user, channel, text)) = event.human_message() {
                if let Some(ts) = event.ts.as_deref() {
                    if !app.recent.first_seen(channel, ts) {
                        debug!(
                            "Skipping duplicate {} event for {} in {}",
                            event.kind, ts, channel
                        );
                        return StatusCode::OK.into_response();
                    }
                }
                info!("Received message in {} from {}", channel, user);
                let (user, channel, text) =
                    (user.to_string(), channel.to_string(), text.to_string());
                let thread_ts = event.thread_ts.clone();
                let state = app.state.clone();

                tokio::spawn(async move {
                    let reply = process_with_shapes(&state, &user, &channel, &text).await;
                    if let Err(e) = state
                        .slack
                        .post_message(&channel, &reply, thread_ts.as_deref())
                        .await
                    {
                        error!("Failed to post reply to {}: {}", channel, e);
                    }
                });
            }
            StatusCode::OK.into_response()
        }
        SlackEnvelope::Other => StatusCode::OK.into_response(),
    }
}

/// 创建路由
pub fn create_router(state: SlackState, events_path: &str) -> Router {
    Router::new()
        .route(events_path, post(slack_events))
        .route("/health", get(health_check))
        .with_state(Arc::new(SlackApp {
            state,
            recent: RecentMessages::default(),
        }))
}
