//! 标准化错误处理
//!
//! 定义桥接层专用的错误类型

use thiserror::Error;

/// 桥接层主要错误类型
#[derive(Error, Debug)]
pub enum BridgeError {
    /// 配置错误（启动时缺失必需项等）
    #[error("Configuration error: {0}")]
    Config(String),

    /// 网络请求错误
    #[error("Network error: failed to communicate: {0}")]
    Network(String),

    /// Shapes API 限流
    #[error("API rate limit exceeded: {0}")]
    RateLimited(String),

    /// 远端返回非成功状态码
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// 远端返回的内容无法解析
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// 渠道发送失败（Telegram、Slack、Sendblue、Mailgun ...）
    #[error("Channel error: {0}")]
    Channel(String),

    /// 存储相关错误
    #[error("Storage error: {0}")]
    Storage(String),

    /// 输入验证错误
    #[error("Validation error: {0}")]
    Validation(String),
}

impl BridgeError {
    /// 面向最终用户的道歉文案
    pub fn user_message(&self) -> &'static str {
        match self {
            BridgeError::RateLimited(_) => RATE_LIMIT_MESSAGE,
            BridgeError::Api { status: 401 | 403, .. } => {
                "Sorry, there seems to be an issue with the API key. Please check your Shapes Inc API key."
            }
            BridgeError::Network(_) => {
                "Sorry, I'm having trouble connecting to the Shapes. Please try again in a moment."
            }
            BridgeError::InvalidResponse(_) => {
                "Sorry, I received an unexpected response from Shapes. This could be due to a temporary service issue."
            }
            _ => "Sorry, I encountered an error with Shapes. Please try again later.",
        }
    }
}

/// 限流时回复给用户的文案
pub const RATE_LIMIT_MESSAGE: &str = "sorry I've hit a rate limit, dude blame Shapes Inc okay";

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BridgeError::InvalidResponse(err.to_string())
        } else {
            BridgeError::Network(err.to_string())
        }
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::InvalidResponse(err.to_string())
    }
}

impl From<rusqlite::Error> for BridgeError {
    fn from(err: rusqlite::Error) -> Self {
        BridgeError::Storage(err.to_string())
    }
}

/// 项目结果类型别名
pub type Result<T> = std::result::Result<T, BridgeError>;
