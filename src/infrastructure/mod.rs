//! 基础设施层：外部系统交互
//!
//! Shapes API、各聊天渠道的 HTTP/TCP 客户端、日志与持久化存储

pub mod irc;
pub mod logger;
pub mod mailgun;
pub mod sendblue;
pub mod shapes;
pub mod slack;
pub mod store;
pub mod telegram;
pub mod twilio;
pub mod web;
