//! 消息实体定义
//!
//! 消息在发送时创建，编辑、回应、已读回执会修改它；
//! 超出保留期的消息由仓储按房间策略清理，最旧的先删。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{MessageId, RoomId, UserId, Username};

/// 消息内容长度上限（过滤之后计数）
pub const MAX_CONTENT_LEN: usize = 2000;

/// 消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    File,
    System,
}

/// 投递状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

/// 附件元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentMeta {
    pub file_url: String,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
}

/// 发送者快照
///
/// 消息记录发送时刻的展示名，后续改名不影响历史消息。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderSnapshot {
    pub user_id: UserId,
    pub display_name: Username,
}

/// 表情回应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    pub user_id: UserId,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

/// 编辑历史条目（保存被替换掉的旧内容）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEdit {
    pub previous_content: String,
    pub edited_at: DateTime<Utc>,
}

/// 已读回执
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub user_id: UserId,
    pub read_at: DateTime<Utc>,
}

/// 消息实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// 消息唯一ID
    pub id: MessageId,
    /// 房间内单调递增的序号，房间级全序的排序键
    pub seq: u64,
    /// 房间标识
    pub room_id: RoomId,
    /// 发送者快照
    pub sender: SenderSnapshot,
    /// 消息内容（已过滤）
    pub content: String,
    /// 消息类型
    pub kind: MessageKind,
    /// 附件元数据
    pub metadata: Option<AttachmentMeta>,
    /// 表情回应列表
    pub reactions: Vec<Reaction>,
    /// 编辑历史（只追加）
    pub edits: Vec<MessageEdit>,
    /// 投递状态
    pub status: DeliveryStatus,
    /// 已读回执
    pub read_by: Vec<ReadReceipt>,
    /// 发送时间
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// 创建消息。内容必须已经过滤，长度在这里做最终校验。
    pub fn new(
        seq: u64,
        room_id: RoomId,
        sender: SenderSnapshot,
        content: impl Into<String>,
        kind: MessageKind,
        metadata: Option<AttachmentMeta>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let content = content.into();
        Self::validate_content(&content)?;

        Ok(Self {
            id: MessageId::generate(),
            seq,
            room_id,
            sender,
            content,
            kind,
            metadata,
            reactions: Vec::new(),
            edits: Vec::new(),
            status: DeliveryStatus::Sent,
            read_by: Vec::new(),
            created_at: now,
        })
    }

    /// 创建系统消息（加入/离开提示等），不走内容过滤。
    pub fn system(
        seq: u64,
        room_id: RoomId,
        sender: SenderSnapshot,
        content: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            seq,
            room_id,
            sender,
            content: content.into(),
            kind: MessageKind::System,
            metadata: None,
            reactions: Vec::new(),
            edits: Vec::new(),
            status: DeliveryStatus::Sent,
            read_by: Vec::new(),
            created_at: now,
        }
    }

    /// 编辑消息：旧内容追加进历史，原文不被销毁。
    pub fn edit(&mut self, new_content: impl Into<String>, now: DateTime<Utc>) -> DomainResult<()> {
        if self.kind != MessageKind::Text {
            return Err(DomainError::validation_failed(
                "content",
                "只有文本消息可以编辑",
            ));
        }

        let new_content = new_content.into();
        Self::validate_content(&new_content)?;

        let previous = std::mem::replace(&mut self.content, new_content);
        self.edits.push(MessageEdit {
            previous_content: previous,
            edited_at: now,
        });
        Ok(())
    }

    pub fn is_edited(&self) -> bool {
        !self.edits.is_empty()
    }

    /// 切换表情回应：同一 (用户, 表情) 再次回应即取消。
    /// 返回 true 表示添加了回应，false 表示取消了回应。
    pub fn toggle_reaction(&mut self, user_id: UserId, emoji: &str, now: DateTime<Utc>) -> bool {
        let existing = self
            .reactions
            .iter()
            .position(|r| r.user_id == user_id && r.emoji == emoji);

        match existing {
            Some(index) => {
                self.reactions.remove(index);
                false
            }
            None => {
                self.reactions.push(Reaction {
                    user_id,
                    emoji: emoji.to_string(),
                    created_at: now,
                });
                true
            }
        }
    }

    /// 记录已读回执，重复标记是幂等的。
    pub fn mark_read(&mut self, user_id: UserId, now: DateTime<Utc>) {
        if self.read_by.iter().any(|r| r.user_id == user_id) {
            return;
        }
        self.read_by.push(ReadReceipt {
            user_id,
            read_at: now,
        });
        self.status = DeliveryStatus::Read;
    }

    fn validate_content(content: &str) -> DomainResult<()> {
        if content.trim().is_empty() {
            return Err(DomainError::validation_failed("content", "消息内容不能为空"));
        }
        if content.chars().count() > MAX_CONTENT_LEN {
            return Err(DomainError::validation_failed(
                "content",
                format!("消息内容不能超过{}个字符", MAX_CONTENT_LEN),
            ));
        }
        Ok(())
    }
}
