//! Telegram 机器人
//!
//! 长轮询 getUpdates，按聊天授权、自动回复、@提及等规则决定是否回复。
//! 私聊里的 `giveaccess` / `approve` / `revoke` 是两步对话：先输入聊天 ID，再输入管理员密码。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::core::access::AccessManager;
use crate::core::conversation::ConversationManager;
use crate::core::message::Role;
use crate::errors::Result;
use crate::infrastructure::shapes::{ChatBackend, CompletionRequest};
use crate::infrastructure::telegram::{Message, TelegramApi, User};

/// 首次 `/start` 时的欢迎语
pub const WELCOME_MESSAGE: &str = "Mr.E is back baby!

Commands you can use:
- @mybot start: Enable auto-reply mode
- @mybot stop: Disable auto-reply mode
- @mybot reset: Clear our conversation history

Access Control Commands:
- @mybot getaccess: Get the chat ID for approval (works in any chat)
- @mybot giveaccess: (DM only) Approve a chat ID with password

Feel free to ask me anything!";

/// 收到图片、视频等媒体时的回复
pub const MEDIA_RESPONSE: &str = "i am blind help! i dont have vision to see images yet";

const INVALID_CHAT_ID: &str = "That doesn't look like a valid chat ID. The approval process has been canceled.\n\n\
Hint: Use the command '@getaccess' in the chat you want to approve to get its chat ID.\n\n\
Then use '@giveaccess' to start the approval process again.";

const INVALID_REVOKE_CHAT_ID: &str = "That doesn't look like a valid chat ID. The process has been canceled.\n\n\
If you want to manually remove access for a chat, you'll need to edit the approved_chats.json file directly.";

/// 授权流程类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    /// 登记待审批后用密码确认
    GiveAccess,
    /// 直接用密码批准
    Approve,
    /// 撤销授权
    Revoke,
}

impl FlowKind {
    fn command(self) -> &'static str {
        match self {
            FlowKind::GiveAccess => "giveaccess",
            FlowKind::Approve => "approve",
            FlowKind::Revoke => "revoke",
        }
    }

    fn prompt(self) -> &'static str {
        match self {
            FlowKind::GiveAccess => {
                "Please enter the chat ID you want to approve.\n\n\
If you don't know the chat ID, use the command '@getaccess' in the chat you want to approve."
            }
            FlowKind::Approve => "Please enter the chat ID you want to approve directly:",
            FlowKind::Revoke => "Please enter the chat ID you want to revoke access for:",
        }
    }
}

/// 授权流程进行到哪一步
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStep {
    AwaitChatId(FlowKind),
    AwaitPassword(FlowKind, i64),
}

/// 解析 `@botname command rest` 形式的命令
///
/// 返回小写的命令名和剩余文本
pub fn extract_command(bot_username: &str, text: &str) -> Option<(String, String)> {
    let mut tokens = text.split_whitespace();
    let mention = tokens.next()?.strip_prefix('@')?;
    if !mention.eq_ignore_ascii_case(bot_username) {
        return None;
    }
    let command = tokens.next()?.to_lowercase();
    let rest = tokens.collect::<Vec<_>>().join(" ");
    Some((command, rest))
}

/// 文本或 mention 实体里是否 @ 了机器人
pub fn is_bot_mentioned(bot_username: &str, message: &Message) -> bool {
    let Some(text) = message.text.as_deref() else {
        return false;
    };
    let handle = format!("@{}", bot_username.to_lowercase());
    if text.to_lowercase().contains(&handle) {
        return true;
    }

    message
        .entities
        .iter()
        .filter(|entity| entity.kind == "mention")
        .filter_map(|entity| message.entity_text(entity))
        .any(|mention| mention.to_lowercase() == handle)
}

/// 是否在回复机器人自己的消息
pub fn is_reply_to_bot(bot_id: i64, message: &Message) -> bool {
    message
        .reply_to_message
        .as_ref()
        .and_then(|replied| replied.from.as_ref())
        .is_some_and(|from| from.id == bot_id)
}

fn is_slash_start(text: &str) -> bool {
    text.split_whitespace()
        .next()
        .map(|first| first.split('@').next() == Some("/start"))
        .unwrap_or(false)
}

/// 机器人行为配置
#[derive(Debug, Clone)]
pub struct BotSettings {
    pub shape: String,
    pub access_check: bool,
    pub context_messages: usize,
}

struct BotState {
    conversations: ConversationManager,
    access: AccessManager,
    welcomed: HashSet<i64>,
    flows: HashMap<i64, FlowStep>,
}

/// Telegram 机器人
pub struct TelegramBot {
    api: TelegramApi,
    backend: Arc<dyn ChatBackend>,
    me: User,
    username: String,
    settings: BotSettings,
    state: Mutex<BotState>,
}

impl TelegramBot {
    pub fn new(
        api: TelegramApi,
        backend: Arc<dyn ChatBackend>,
        me: User,
        access: AccessManager,
        settings: BotSettings,
    ) -> Self {
        let username = me.username.clone().unwrap_or_default();
        Self {
            api,
            backend,
            me,
            username,
            state: Mutex::new(BotState {
                conversations: ConversationManager::new(settings.context_messages),
                access,
                welcomed: HashSet::new(),
                flows: HashMap::new(),
            }),
            settings,
        }
    }

    /// 查询 getMe 后创建
    pub async fn connect(
        api: TelegramApi,
        backend: Arc<dyn ChatBackend>,
        access: AccessManager,
        settings: BotSettings,
    ) -> Result<Self> {
        let me = api.get_me().await?;
        info!("Logged in as @{}", me.username.as_deref().unwrap_or("unknown"));
        Ok(Self::new(api, backend, me, access, settings))
    }

    async fn reply(&self, message: &Message, text: &str) -> Result<()> {
        self.api
            .send_message(message.chat.id, text, Some(message.message_id), false)
            .await?;
        Ok(())
    }

    /// 处理一条消息
    pub async fn handle_message(&self, message: &Message) -> Result<()> {
        let Some(user) = message.from.as_ref() else {
            return Ok(());
        };
        let chat_id = message.chat.id;
        let user_identifier = user.identifier();
        let conversation_id =
            ConversationManager::conversation_id(chat_id, message.message_thread_id);

        if let Some(text) = message.text.as_deref() {
            if is_slash_start(text) {
                return self.start_command(message, user.id, &conversation_id).await;
            }
        }

        if message.chat.is_private() && self.handle_approval_flow(message, user.id).await? {
            return Ok(());
        }

        if let (Some(text), true) = (message.text.as_deref(), message.chat.is_group()) {
            let mut state = self.state.lock().await;
            state
                .conversations
                .add_message(&conversation_id, Role::User, text, Some(user.id));
            debug!("Added message from {} to conversation context", user_identifier);
        }

        if message.has_media() {
            info!("Received media message from {}", user_identifier);
            self.reply(message, MEDIA_RESPONSE).await?;
        }

        let Some(text) = message.text.as_deref() else {
            return Ok(());
        };

        if let Some((command, _rest)) = extract_command(&self.username, text) {
            info!("Received command '{}' from {}", command, user_identifier);
            if self.handle_command(message, user.id, &command, &conversation_id).await? {
                return Ok(());
            }
        }

        let approved = {
            let state = self.state.lock().await;
            !self.settings.access_check || state.access.is_chat_approved(chat_id)
        };
        if !approved {
            let notice = if message.chat.is_private() {
                format!(
                    "You need to approve this chat first.\n\n\
Type: @{0} getaccess to get your chat ID\n\n\
Then type: @{0} giveaccess to approve with password.",
                    self.username
                )
            } else {
                format!(
                    "This chat is not approved to use me.\n\n\
Use the command: @{} getaccess\n\n\
Then follow the instructions to approve this chat.",
                    self.username
                )
            };
            self.reply(message, &notice).await?;
            info!("Ignoring message from {} in unapproved chat {}", user_identifier, chat_id);
            return Ok(());
        }

        if !self.should_respond(message, &conversation_id, &user_identifier).await {
            return Ok(());
        }

        let history = {
            let mut state = self.state.lock().await;
            if message.chat.is_private() {
                state
                    .conversations
                    .add_message(&conversation_id, Role::User, text, Some(user.id));
            }
            state.conversations.history(&conversation_id)
        };

        if let Err(e) = self.api.send_chat_action(chat_id, "typing").await {
            warn!("Failed to send typing action: {}", e);
        }

        let request = CompletionRequest::for_shape(&self.settings.shape, history)
            .user(user.id.to_string())
            .channel(chat_id.to_string())
            .temperature(0.7)
            .max_tokens(1024);

        match self.backend.complete(request).await {
            Ok(answer) => {
                {
                    let mut state = self.state.lock().await;
                    state
                        .conversations
                        .add_message(&conversation_id, Role::Assistant, answer.as_str(), None);
                }
                if let Err(e) = self
                    .api
                    .send_message(chat_id, &answer, Some(message.message_id), true)
                    .await
                {
                    warn!("Markdown reply rejected, retrying as plain text: {}", e);
                    self.reply(message, &answer).await?;
                }
            }
            Err(e) => {
                error!("Error generating response: {}", e);
                self.reply(message, e.user_message()).await?;
            }
        }
        Ok(())
    }

    async fn should_respond(&self, message: &Message, conversation_id: &str, user: &str) -> bool {
        if message.chat.is_private() {
            return true;
        }

        let auto_reply = {
            let state = self.state.lock().await;
            state.conversations.is_auto_reply_enabled(conversation_id)
        };
        let mentioned = is_bot_mentioned(&self.username, message);
        let reply_to_bot = is_reply_to_bot(self.me.id, message);

        if reply_to_bot {
            info!("Responding to {} because they replied to a bot message", user);
        } else if mentioned {
            info!("Responding to {} because they mentioned the bot", user);
        } else if auto_reply {
            info!("Responding to {} because auto-reply is enabled", user);
        }
        auto_reply || mentioned || reply_to_bot
    }

    async fn start_command(
        &self,
        message: &Message,
        user_id: i64,
        conversation_id: &str,
    ) -> Result<()> {
        let first_visit = {
            let mut state = self.state.lock().await;
            state.conversations.enable_auto_reply(conversation_id);
            message.chat.is_private() && state.welcomed.insert(user_id)
        };

        if first_visit {
            self.reply(message, WELCOME_MESSAGE).await?;
        }
        self.reply(
            message,
            "I'm now in auto-reply mode. I'll respond to all messages in this chat.",
        )
        .await
    }

    /// 处理 `@bot command`，返回 true 表示已处理
    async fn handle_command(
        &self,
        message: &Message,
        user_id: i64,
        command: &str,
        conversation_id: &str,
    ) -> Result<bool> {
        match command {
            "getaccess" | "getacess" => {
                self.get_access(message, user_id).await?;
                return Ok(true);
            }
            "giveaccess" | "giveacess" | "approve" | "revoke" => {
                let kind = match command {
                    "approve" => FlowKind::Approve,
                    "revoke" => FlowKind::Revoke,
                    _ => FlowKind::GiveAccess,
                };
                if !message.chat.is_private() {
                    // giveaccess 在群里按普通消息处理，approve/revoke 给出提示
                    if kind == FlowKind::GiveAccess {
                        return Ok(false);
                    }
                    self.reply(
                        message,
                        &format!(
                            "For security, the {} command can only be used in private messages. Please send me a direct message.",
                            kind.command()
                        ),
                    )
                    .await?;
                    return Ok(true);
                }
                self.state
                    .lock()
                    .await
                    .flows
                    .insert(user_id, FlowStep::AwaitChatId(kind));
                self.reply(message, kind.prompt()).await?;
                info!("User {} started the {} flow", user_id, kind.command());
                return Ok(true);
            }
            _ => {}
        }

        let notice = {
            let mut state = self.state.lock().await;
            if self.settings.access_check && !state.access.is_chat_approved(message.chat.id) {
                return Ok(false);
            }
            match command {
                "start" => {
                    state.conversations.enable_auto_reply(conversation_id);
                    "Auto-reply mode enabled. I'll respond to all messages in this chat."
                }
                "stop" => {
                    state.conversations.disable_auto_reply(conversation_id);
                    "Auto-reply mode disabled. I'll only respond when mentioned or replied to."
                }
                "reset" => {
                    state.conversations.reset(conversation_id);
                    "Conversation history has been reset."
                }
                _ => return Ok(false),
            }
        };

        self.reply(message, notice).await?;
        Ok(true)
    }

    async fn get_access(&self, message: &Message, user_id: i64) -> Result<()> {
        let chat_id = message.chat.id;
        let text = if message.chat.is_private() {
            format!(
                "📋 Your Chat ID: {}\n\n\
Since you're in a direct message with me already, you can approve yourself by using:\n\
@{} giveaccess\n\n\
Then enter this chat ID and the admin password when prompted.",
                chat_id, self.username
            )
        } else {
            format!(
                "📋 This chat's ID is: {0}\n\n\
To approve this chat, please start a direct message with me and use:\n\
@{1} giveaccess\n\n\
Then enter this chat ID ({0}) and the admin password when prompted.",
                chat_id, self.username
            )
        };
        self.reply(message, &text).await?;
        info!("User {} requested access for chat {}", user_id, chat_id);
        Ok(())
    }

    /// 授权流程中的输入，返回 true 表示已被流程消费
    async fn handle_approval_flow(&self, message: &Message, user_id: i64) -> Result<bool> {
        let text = message.text.as_deref().unwrap_or_default().trim();

        let reply = {
            let mut state = self.state.lock().await;
            let Some(step) = state.flows.get(&user_id).copied() else {
                return Ok(false);
            };

            match step {
                FlowStep::AwaitChatId(kind) => match text.parse::<i64>() {
                    Ok(chat_id) => {
                        state
                            .flows
                            .insert(user_id, FlowStep::AwaitPassword(kind, chat_id));
                        info!(
                            "User {} provided chat ID {} for {}",
                            user_id,
                            chat_id,
                            kind.command()
                        );
                        match kind {
                            FlowKind::GiveAccess => {
                                "Got it! Now please enter the admin password:".to_string()
                            }
                            FlowKind::Approve => format!(
                                "Got it! Now please enter the admin password to approve chat ID {}:",
                                chat_id
                            ),
                            FlowKind::Revoke => format!(
                                "Got it! Now please enter the admin password to revoke access for chat ID {}:",
                                chat_id
                            ),
                        }
                    }
                    Err(_) => {
                        state.flows.remove(&user_id);
                        info!(
                            "User {} {} flow canceled due to invalid chat ID",
                            user_id,
                            kind.command()
                        );
                        match kind {
                            FlowKind::Revoke => INVALID_REVOKE_CHAT_ID.to_string(),
                            _ => INVALID_CHAT_ID.to_string(),
                        }
                    }
                },
                FlowStep::AwaitPassword(kind, chat_id) => {
                    state.flows.remove(&user_id);
                    let outcome = match kind {
                        FlowKind::GiveAccess => {
                            state.access.register_pending_approval(user_id, chat_id);
                            state.access.approve_chat(user_id, text)
                        }
                        FlowKind::Approve => state.access.direct_approve_chat(chat_id, text),
                        FlowKind::Revoke => state.access.revoke_access(chat_id, text),
                    };
                    info!(
                        "User {} completed {} for chat {}, result: {}",
                        user_id,
                        kind.command(),
                        chat_id,
                        outcome.success
                    );
                    outcome.message
                }
            }
        };

        self.reply(message, &reply).await?;
        Ok(true)
    }

    /// 长轮询主循环
    pub async fn run(&self, poll_timeout_secs: u64) -> Result<()> {
        let mut offset: Option<i64> = None;
        info!("Starting bot...");

        loop {
            let updates = match self.api.get_updates(offset, poll_timeout_secs).await {
                Ok(updates) => updates,
                Err(e) => {
                    error!("Failed to fetch updates: {}", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            for update in updates {
                offset = Some(update.update_id + 1);
                if let Some(message) = update.message {
                    if let Err(e) = self.handle_message(&message).await {
                        error!("Failed to handle message {}: {}", message.message_id, e);
                    }
                }
            }
        }
    }
}
