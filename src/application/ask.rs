//! 单次提问
//!
//! 把一条消息发给 shape 并返回回复，适合快速检查 API key 与 shape 配置

use crate::errors::Result;
use crate::infrastructure::shapes::{ChatBackend, CompletionRequest};

/// 发送消息并返回回复
pub async fn ask(
    backend: &dyn ChatBackend,
    shape: &str,
    message: &str,
    user_id: Option<&str>,
    channel_id: Option<&str>,
) -> Result<String> {
    let mut request = CompletionRequest::single(shape, message);
    if let Some(user_id) = user_id {
        request = request.user(user_id);
    }
    if let Some(channel_id) = channel_id {
        request = request.channel(channel_id);
    }
    backend.complete(request).await
}
