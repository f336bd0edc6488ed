//! Shapes 渠道桥接
//!
//! 把各类聊天渠道的消息转发给 Shapes 角色（OpenAI 兼容 API），再把回复发回原渠道：
//! - Telegram 机器人（长轮询、聊天授权、自动回复）
//! - Slack Events API
//! - 短信（Twilio）与 iMessage（Sendblue），通过接线台选择角色
//! - 邮件（Mailgun），保持邮件会话线程
//! - IRC 频道
//! - 流式 OpenAI 兼容代理
//!
//! # 架构分层
//!
//! - `core`: 核心层，与渠道无关的领域逻辑
//! - `infrastructure`: 基础设施层，外部系统交互
//! - `application`: 应用层，渠道适配器

// 核心层
pub mod core;

// 基础设施层
pub mod infrastructure;

// 应用层
pub mod application;

pub mod config;
pub mod errors;

// 重新导出常用类型
pub use crate::config::{Cli, Command};
pub use crate::core::message::{ChatMessage, Role};
pub use crate::errors::{BridgeError, Result};
pub use crate::infrastructure::logger;
pub use crate::infrastructure::shapes::{ChatBackend, CompletionRequest, ShapesClient};

/// 版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
