//! 流式代理
//!
//! 对外暴露 OpenAI 兼容的 `/v1/chat/completions`，把请求转给 Shapes，
//! 再把完整回复按字符拆成 SSE 分片模拟流式输出

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream, StreamExt};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tracing::error;

use crate::infrastructure::shapes::{completion_content, ShapesClient};

/// 请求未指定模型时使用的模型
pub const DEFAULT_MODEL: &str = "shapesinc/beta-1q75";

/// 分片间隔
const CHUNK_DELAY: Duration = Duration::from_millis(10);

// ==================== 状态 ====================

#[derive(Clone)]
pub struct ProxyState {
    pub client: ShapesClient,
    pub user_id: String,
    pub channel_id: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (status, Json(json!({ "error": error.into() }))).into_response()
}

/// 取第一条 user 消息的内容
pub fn first_user_message(body: &Value) -> String {
    body.get("messages")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .find(|msg| msg.get("role").and_then(Value::as_str) == Some("user"))
        .and_then(|msg| msg.get("content"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// 每个字符一个 delta 分片，最后是 `[DONE]`
pub fn completion_chunks(completion: &str) -> Vec<String> {
    completion
        .chars()
        .map(|c| {
            json!({
                "choices": [{ "delta": { "content": c.to_string() }, "finish_reason": null }]
            })
            .to_string()
        })
        .chain(std::iter::once("[DONE]".to_string()))
        .collect()
}

fn sse_stream(completion: &str) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::iter(completion_chunks(completion)).then(|chunk| async move {
        if chunk != "[DONE]" {
            tokio::time::sleep(CHUNK_DELAY).await;
        }
        Ok(Event::default().data(chunk))
    })
}

async fn chat_completions(
    State(state): State<Arc<ProxyState>>,
    Json(body): Json<Value>,
) -> Response {
    let user_text = first_user_message(&body);
    let model = body
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_MODEL)
        .to_string();

    let upstream = json!({
        "model": model,
        "messages": [{ "role": "user", "content": user_text }],
    });

    let (status, text) = match state
        .client
        .raw_completion(&upstream, Some(&state.user_id), Some(&state.channel_id))
        .await
    {
        Ok(res) => res,
        Err(e) => {
            error!("Upstream request failed: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    if status != 200 {
        let code = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
        return error_response(code, text);
    }

    match completion_content(&text) {
        Ok(completion) => Sse::new(sse_stream(&completion)).into_response(),
        Err(_) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "Invalid response format"),
    }
}

async fn list_models(State(state): State<Arc<ProxyState>>) -> Response {
    match state.client.list_models().await {
        Ok((status, text)) => {
            let code = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            match serde_json::from_str::<Value>(&text) {
                Ok(value) => (code, Json(value)).into_response(),
                Err(_) => error_response(code, text),
            }
        }
        Err(e) => {
            error!("Upstream request failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// 创建路由
pub fn create_router(state: ProxyState) -> Router {
    let cors = CorsLayer::permissive();

    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .layer(cors)
        .with_state(Arc::new(state))
}
