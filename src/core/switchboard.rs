//! 接线台路由
//!
//! 短信和 iMessage 共用的人设选择逻辑：
//! 1. 消息里带 shapes.inc 主页链接 -> 绑定该 shape
//! 2. 已绑定 -> 交给绑定的 shape 回复
//! 3. 未绑定但已经发过问候 -> 自动接入接线员 shape
//! 4. 首次来信 -> 发送接线员问候

use std::sync::Arc;

use tracing::info;

use super::persona::PersonaStore;
use super::shape::extract_shape_username;
use crate::errors::Result;

/// 默认的接线员 shape
pub const DEFAULT_OPERATOR_SHAPE: &str = "operator";

/// 路由结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// 用户通过链接选择了新的 shape
    Connected(String),
    /// 交给已绑定的 shape 回复
    Reply(String),
    /// 问候之后仍未选择，自动接入接线员
    AutoConnected(String),
    /// 首次来信，发送问候
    Greeting,
}

/// 问候语里示例链接的写法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStyle {
    /// 短信：`shapes.inc/shoutingguy`
    Bare,
    /// iMessage：`https://shapes.inc/tenshi`
    Https,
}

/// 接线台
#[derive(Clone)]
pub struct Switchboard {
    store: Arc<dyn PersonaStore>,
    operator_shape: String,
}

impl Switchboard {
    pub fn new(store: Arc<dyn PersonaStore>, operator_shape: impl Into<String>) -> Self {
        Self {
            store,
            operator_shape: operator_shape.into(),
        }
    }

    pub fn operator_shape(&self) -> &str {
        &self.operator_shape
    }

    /// 为一条来信决定路由，并更新绑定状态
    pub async fn route(&self, chat_id: &str, text: &str) -> Result<Route> {
        if let Some(shape) = extract_shape_username(text) {
            self.store.bind(chat_id, &shape).await?;
            self.store.set_operator_prompted(chat_id, false).await?;
            info!("Set shape for {} to {}", chat_id, shape);
            return Ok(Route::Connected(shape));
        }

        if let Some(shape) = self.store.shape_for(chat_id).await? {
            return Ok(Route::Reply(shape));
        }

        if self.store.operator_prompted(chat_id).await?.unwrap_or(false) {
            self.store.bind(chat_id, &self.operator_shape).await?;
            info!("Auto-connected {} to {}", chat_id, self.operator_shape);
            return Ok(Route::AutoConnected(self.operator_shape.clone()));
        }

        self.store.set_operator_prompted(chat_id, true).await?;
        Ok(Route::Greeting)
    }
}

/// 选择 shape 后的确认
pub fn connected_message(shape: &str) -> String {
    format!(
        "Connecting you with {shape} now... You're all set! {shape} is now on the line and ready to chat with you."
    )
}

/// 自动接入接线员的提示
pub fn auto_connected_message(shape: &str) -> String {
    format!("You are now connected to {}.", shape)
}

/// 接线员问候
pub fn greeting(style: LinkStyle) -> String {
    let (directory, example) = match style {
        LinkStyle::Bare => ("shapes.inc", "shapes.inc/shoutingguy"),
        LinkStyle::Https => ("https://shapes.inc", "https://shapes.inc/tenshi"),
    };
    format!(
        "Hello, Shapes Switchboard here! I'll connect you with a Shape now. Who would you like to speak with today? Just visit {} to browse our directory, then send me their profile link (like {}) and I'll connect you right away.",
        directory, example
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::persona::MemoryPersonaStore;

    fn switchboard() -> Switchboard {
        Switchboard::new(Arc::new(MemoryPersonaStore::new()), "operator")
    }

    #[tokio::test]
    async fn test_first_contact_then_auto_connect() {
        let board = switchboard();
        assert_eq!(board.route("+1555", "hi").await.unwrap(), Route::Greeting);
        assert_eq!(
            board.route("+1555", "hello?").await.unwrap(),
            Route::AutoConnected("operator".into())
        );
        assert_eq!(
            board.route("+1555", "still there").await.unwrap(),
            Route::Reply("operator".into())
        );
    }

    #[tokio::test]
    async fn test_binding_sticks_until_rebound() {
        let board = switchboard();
        assert_eq!(
            board.route("g1", "https://shapes.inc/tenshi").await.unwrap(),
            Route::Connected("tenshi".into())
        );
        for _ in 0..3 {
            assert_eq!(
                board.route("g1", "how are you").await.unwrap(),
                Route::Reply("tenshi".into())
            );
        }
        assert_eq!(
            board.route("g1", "switch to shapes.inc/bob/chat").await.unwrap(),
            Route::Connected("bob".into())
        );
        assert_eq!(
            board.route("g1", "yo").await.unwrap(),
            Route::Reply("bob".into())
        );
    }

    #[tokio::test]
    async fn test_chats_are_independent() {
        let board = switchboard();
        board.route("a", "shapes.inc/tenshi").await.unwrap();
        assert_eq!(board.route("b", "hi").await.unwrap(), Route::Greeting);
    }

    #[test]
    fn test_messages() {
        assert!(connected_message("tenshi").starts_with("Connecting you with tenshi now"));
        assert_eq!(auto_connected_message("operator"), "You are now connected to operator.");
        assert!(greeting(LinkStyle::Bare).contains("(like shapes.inc/shoutingguy)"));
        assert!(greeting(LinkStyle::Https).contains("(like https://shapes.inc/tenshi)"));
    }
}
