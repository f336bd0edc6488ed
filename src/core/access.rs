//! 访问控制
//!
//! 允许名单保存在一个 JSON 文件里（整数聊天 ID 数组）。
//! 所有修改都需要管理员密码，密码错误时名单保持不变。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{error, info};

/// 默认管理员密码
pub const DEFAULT_ADMIN_PASSWORD: &str = "change-this-password";

/// 默认允许名单文件
pub const DEFAULT_ACCESS_FILE: &str = "approved_chats.json";

const WRONG_PASSWORD: &str =
    "Incorrect password! Access denied. Please try again with the correct password.";

/// 审批结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalOutcome {
    pub success: bool,
    pub message: String,
}

impl ApprovalOutcome {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn denied(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// 基于聊天 ID 的访问管理器
#[derive(Debug)]
pub struct AccessManager {
    access_file: PathBuf,
    admin_password: String,
    approved_chats: Vec<i64>,
    pending_approvals: HashMap<i64, i64>,
}

impl AccessManager {
    /// 从文件加载允许名单
    ///
    /// 文件不存在时以空名单启动并创建文件；文件损坏时以空名单启动
    pub fn load(access_file: impl AsRef<Path>, admin_password: impl Into<String>) -> Self {
        let access_file = access_file.as_ref().to_path_buf();
        let mut manager = Self {
            access_file,
            admin_password: admin_password.into(),
            approved_chats: Vec::new(),
            pending_approvals: HashMap::new(),
        };

        if manager.access_file.exists() {
            match std::fs::read_to_string(&manager.access_file)
                .map_err(|e| e.to_string())
                .and_then(|raw| serde_json::from_str::<Vec<i64>>(&raw).map_err(|e| e.to_string()))
            {
                Ok(chats) => {
                    info!("Loaded {} approved chat IDs", chats.len());
                    manager.approved_chats = chats;
                }
                Err(e) => error!("Error loading approved chats: {}", e),
            }
        } else {
            info!("No approved chats file found, starting with empty list");
            manager.save();
        }

        manager
    }

    fn save(&self) {
        let result = serde_json::to_string(&self.approved_chats)
            .map_err(|e| e.to_string())
            .and_then(|json| std::fs::write(&self.access_file, json).map_err(|e| e.to_string()));

        match result {
            Ok(()) => info!("Saved {} approved chat IDs", self.approved_chats.len()),
            Err(e) => error!("Error saving approved chats: {}", e),
        }
    }

    pub fn is_chat_approved(&self, chat_id: i64) -> bool {
        self.approved_chats.contains(&chat_id)
    }

    pub fn approved_chats(&self) -> &[i64] {
        &self.approved_chats
    }

    /// 登记一个待审批的聊天
    pub fn register_pending_approval(&mut self, user_id: i64, chat_id: i64) {
        self.pending_approvals.insert(user_id, chat_id);
        info!(
            "Registered pending approval: user {} for chat {}",
            user_id, chat_id
        );
    }

    /// 审批该用户之前登记的聊天
    pub fn approve_chat(&mut self, user_id: i64, password: &str) -> ApprovalOutcome {
        let Some(&chat_id) = self.pending_approvals.get(&user_id) else {
            return ApprovalOutcome::denied(
                "No pending approval request found. Please use the '@botname getaccess' command in the chat you want to approve first.",
            );
        };

        if password != self.admin_password {
            return ApprovalOutcome::denied(WRONG_PASSWORD);
        }

        self.pending_approvals.remove(&user_id);
        self.add_approved(chat_id)
    }

    /// 直接审批指定聊天
    pub fn direct_approve_chat(&mut self, chat_id: i64, password: &str) -> ApprovalOutcome {
        if password != self.admin_password {
            return ApprovalOutcome::denied(WRONG_PASSWORD);
        }
        self.add_approved(chat_id)
    }

    fn add_approved(&mut self, chat_id: i64) -> ApprovalOutcome {
        if self.is_chat_approved(chat_id) {
            return ApprovalOutcome::ok(format!(
                "Chat ID {} was already approved! No changes needed.",
                chat_id
            ));
        }

        self.approved_chats.push(chat_id);
        self.save();

        ApprovalOutcome::ok(format!(
            "Success! Chat ID {} has been approved. The bot will now respond in that chat.",
            chat_id
        ))
    }

    /// 撤销聊天的访问权限
    pub fn revoke_access(&mut self, chat_id: i64, password: &str) -> ApprovalOutcome {
        if password != self.admin_password {
            return ApprovalOutcome::denied(WRONG_PASSWORD);
        }

        let Some(pos) = self.approved_chats.iter().position(|&c| c == chat_id) else {
            return ApprovalOutcome::denied(format!(
                "Chat ID {} is not in the approved list, so it can't be revoked.",
                chat_id
            ));
        };

        self.approved_chats.remove(pos);
        self.save();

        ApprovalOutcome::ok(format!(
            "Success! Access for chat ID {} has been revoked. The bot will no longer respond in that chat.",
            chat_id
        ))
    }
}
