//! 会话上下文管理
//!
//! 每个会话维护一个定长的消息队列，满了之后从最旧的一端丢弃。
//! 同时记录哪些会话开启了自动回复，以及会话里出现过的用户。

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, info};

use super::message::{ChatMessage, Role};

/// 默认上下文长度：后端自己维护记忆，只需要带上当前消息
pub const DEFAULT_CONTEXT_MESSAGES: usize = 1;

/// 定长消息队列
#[derive(Debug, Clone)]
pub struct ConversationBuffer {
    capacity: usize,
    messages: VecDeque<ChatMessage>,
}

impl ConversationBuffer {
    /// 创建新的队列，容量至少为 1
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            messages: VecDeque::with_capacity(capacity),
        }
    }

    /// 追加消息，满时先淘汰最旧的一条
    pub fn push(&mut self, message: ChatMessage) {
        while self.messages.len() >= self.capacity {
            self.messages.pop_front();
        }
        self.messages.push_back(message);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// 按时间顺序（旧 -> 新）导出
    pub fn to_vec(&self) -> Vec<ChatMessage> {
        self.messages.iter().cloned().collect()
    }
}

/// 会话管理器
#[derive(Debug)]
pub struct ConversationManager {
    capacity: usize,
    conversations: HashMap<String, ConversationBuffer>,
    auto_reply: HashSet<String>,
    participants: HashMap<String, HashSet<i64>>,
}

impl ConversationManager {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            conversations: HashMap::new(),
            auto_reply: HashSet::new(),
            participants: HashMap::new(),
        }
    }

    /// 根据聊天 ID 和话题 ID 生成会话 ID
    pub fn conversation_id(chat_id: i64, thread_id: Option<i64>) -> String {
        match thread_id {
            Some(thread) => format!("{}_{}", chat_id, thread),
            None => chat_id.to_string(),
        }
    }

    /// 记录一条消息；用户消息同时登记发言人
    pub fn add_message(
        &mut self,
        conversation_id: &str,
        role: Role,
        content: impl Into<String>,
        user_id: Option<i64>,
    ) {
        let capacity = self.capacity;
        let buffer = self
            .conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| ConversationBuffer::new(capacity));
        buffer.push(ChatMessage::new(role, content));

        if let (Some(user_id), Role::User) = (user_id, role) {
            self.participants
                .entry(conversation_id.to_string())
                .or_default()
                .insert(user_id);
        }

        debug!(
            "Added {} message to conversation {}, history length {}",
            role,
            conversation_id,
            buffer.len()
        );
    }

    /// 获取会话历史
    pub fn history(&self, conversation_id: &str) -> Vec<ChatMessage> {
        self.conversations
            .get(conversation_id)
            .map(ConversationBuffer::to_vec)
            .unwrap_or_default()
    }

    /// 清空会话历史
    pub fn reset(&mut self, conversation_id: &str) {
        if let Some(buffer) = self.conversations.get_mut(conversation_id) {
            buffer.clear();
            info!("Reset conversation history for {}", conversation_id);
        }
    }

    pub fn enable_auto_reply(&mut self, conversation_id: &str) {
        self.auto_reply.insert(conversation_id.to_string());
        info!("Auto-reply enabled for conversation {}", conversation_id);
    }

    pub fn disable_auto_reply(&mut self, conversation_id: &str) {
        self.auto_reply.remove(conversation_id);
        info!("Auto-reply disabled for conversation {}", conversation_id);
    }

    pub fn is_auto_reply_enabled(&self, conversation_id: &str) -> bool {
        self.auto_reply.contains(conversation_id)
    }

    /// 会话中出现过的用户
    pub fn participants(&self, conversation_id: &str) -> Vec<i64> {
        let mut users: Vec<i64> = self
            .participants
            .get(conversation_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        users.sort_unstable();
        users
    }
}

impl Default for ConversationManager {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_MESSAGES)
    }
}
