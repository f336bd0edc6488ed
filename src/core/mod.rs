//! 核心层：与渠道无关的领域模型
//!
//! 包含对话消息、会话上下文、访问控制、人设绑定和接线台路由

pub mod access;
pub mod conversation;
pub mod message;
pub mod persona;
pub mod shape;
pub mod switchboard;
