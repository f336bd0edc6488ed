//! Web 服务公共部分
//!
//! 各个 webhook 适配器共用的健康检查、错误响应和启动函数

use axum::{http::StatusCode, response::IntoResponse, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tracing::info;

// ==================== 错误响应 ====================

#[derive(Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: "error",
            message: message.into(),
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> axum::response::Response {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self)).into_response()
    }
}

// ==================== 处理器 ====================

/// 健康检查
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// 绑定地址并启动服务，直到出错才返回
pub async fn serve(bind_addr: &str, app: Router) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("Web server started on http://{}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
