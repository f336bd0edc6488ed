//! 人设绑定存储
//!
//! 记录每个聊天（用户号码或群组 ID）当前绑定的 shape，以及是否已经发过接线员问候。
//! 后写覆盖先写，没有淘汰策略。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::warn;

use crate::errors::Result;

/// shape 绑定的键前缀
pub const SHAPE_KEY_PREFIX: &str = "shape-text:";
/// 接线员问候标记的键前缀
pub const OPERATOR_KEY_PREFIX: &str = "operator_msg:";

pub fn shape_key(chat_id: &str) -> String {
    format!("{}{}", SHAPE_KEY_PREFIX, chat_id)
}

pub fn operator_key(chat_id: &str) -> String {
    format!("{}{}", OPERATOR_KEY_PREFIX, chat_id)
}

/// 人设存储接口
#[async_trait]
pub trait PersonaStore: Send + Sync {
    /// 查询聊天绑定的 shape
    async fn shape_for(&self, chat_id: &str) -> Result<Option<String>>;

    /// 绑定 shape
    async fn bind(&self, chat_id: &str, shape: &str) -> Result<()>;

    /// 是否已经发过接线员问候
    async fn operator_prompted(&self, chat_id: &str) -> Result<Option<bool>>;

    /// 设置接线员问候标记
    async fn set_operator_prompted(&self, chat_id: &str, sent: bool) -> Result<()>;
}

/// 内存存储，进程退出后丢失
#[derive(Default)]
pub struct MemoryPersonaStore {
    shapes: RwLock<HashMap<String, String>>,
    operator: RwLock<HashMap<String, bool>>,
}

impl MemoryPersonaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersonaStore for MemoryPersonaStore {
    async fn shape_for(&self, chat_id: &str) -> Result<Option<String>> {
        Ok(self.shapes.read().await.get(chat_id).cloned())
    }

    async fn bind(&self, chat_id: &str, shape: &str) -> Result<()> {
        self.shapes
            .write()
            .await
            .insert(chat_id.to_string(), shape.to_string());
        Ok(())
    }

    async fn operator_prompted(&self, chat_id: &str) -> Result<Option<bool>> {
        Ok(self.operator.read().await.get(chat_id).copied())
    }

    async fn set_operator_prompted(&self, chat_id: &str, sent: bool) -> Result<()> {
        self.operator
            .write()
            .await
            .insert(chat_id.to_string(), sent);
        Ok(())
    }
}

/// 内存 + 可选持久层
///
/// 写入总是落到内存，持久层可用时同时写入；读取优先持久层，
/// 出错或未命中时回落到内存。持久层错误只记录日志。
pub struct LayeredPersonaStore {
    memory: MemoryPersonaStore,
    durable: Option<Arc<dyn PersonaStore>>,
}

impl LayeredPersonaStore {
    pub fn new(durable: Option<Arc<dyn PersonaStore>>) -> Self {
        Self {
            memory: MemoryPersonaStore::new(),
            durable,
        }
    }

    /// 仅内存
    pub fn in_memory() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl PersonaStore for LayeredPersonaStore {
    async fn shape_for(&self, chat_id: &str) -> Result<Option<String>> {
        if let Some(durable) = &self.durable {
            match durable.shape_for(chat_id).await {
                Ok(Some(shape)) => return Ok(Some(shape)),
                Ok(None) => {}
                Err(e) => warn!("Persona store error when getting shape for {}: {}", chat_id, e),
            }
        }
        self.memory.shape_for(chat_id).await
    }

    async fn bind(&self, chat_id: &str, shape: &str) -> Result<()> {
        self.memory.bind(chat_id, shape).await?;
        if let Some(durable) = &self.durable {
            if let Err(e) = durable.bind(chat_id, shape).await {
                warn!("Persona store error when setting shape for {}: {}", chat_id, e);
            }
        }
        Ok(())
    }

    async fn operator_prompted(&self, chat_id: &str) -> Result<Option<bool>> {
        if let Some(durable) = &self.durable {
            match durable.operator_prompted(chat_id).await {
                Ok(Some(sent)) => return Ok(Some(sent)),
                Ok(None) => {}
                Err(e) => warn!(
                    "Persona store error when getting operator flag for {}: {}",
                    chat_id, e
                ),
            }
        }
        self.memory.operator_prompted(chat_id).await
    }

    async fn set_operator_prompted(&self, chat_id: &str, sent: bool) -> Result<()> {
        self.memory.set_operator_prompted(chat_id, sent).await?;
        if let Some(durable) = &self.durable {
            if let Err(e) = durable.set_operator_prompted(chat_id, sent).await {
                warn!(
                    "Persona store error when setting operator flag for {}: {}",
                    chat_id, e
                );
            }
        }
        Ok(())
    }
}
