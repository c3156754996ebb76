//! 房间实体定义
//!
//! 房间是持久配置（容量、设置、封禁名单、版主名单）；
//! 实时占用集合是短暂状态，由应用层的房间目录维护，不在实体内。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{RoomId, UserId};

/// 房间类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    Public,
    Private,
    Direct,
}

/// 房间设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSettings {
    /// 慢速模式间隔（秒），0 表示关闭
    pub slow_mode_secs: u64,
    /// 消息保留天数
    pub retention_days: u32,
    /// 是否允许图片消息
    pub allow_images: bool,
    /// 是否允许文件消息
    pub allow_files: bool,
    /// 单个附件大小上限（字节）
    pub max_file_size: u64,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            slow_mode_secs: 0,
            retention_days: 30,
            allow_images: true,
            allow_files: true,
            max_file_size: 5 * 1024 * 1024,
        }
    }
}

/// 封禁记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomBan {
    pub user_id: UserId,
    pub reason: Option<String>,
    pub banned_by: UserId,
    pub banned_at: DateTime<Utc>,
    /// None 表示永久封禁
    pub expires_at: Option<DateTime<Utc>>,
}

impl RoomBan {
    /// 封禁是否在 `now` 时刻仍然生效
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expiry) => expiry > now,
            None => true,
        }
    }
}

/// 禁言记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomMute {
    pub user_id: UserId,
    pub muted_by: UserId,
    pub muted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl RoomMute {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expiry) => expiry > now,
            None => true,
        }
    }
}

/// 房间实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    /// 房间标识（slug）
    pub id: RoomId,
    /// 展示名称
    pub name: String,
    /// 描述
    pub description: String,
    /// 房间类型
    pub kind: RoomKind,
    /// 容量上限
    pub capacity: u32,
    /// 房间设置
    pub settings: RoomSettings,
    /// 版主集合
    pub moderators: HashSet<UserId>,
    /// 封禁名单
    pub bans: Vec<RoomBan>,
    /// 禁言名单
    pub mutes: Vec<RoomMute>,
    /// 创建时间
    pub created_at: DateTime<Utc>,
}

impl Room {
    /// 创建新房间
    pub fn new(
        id: RoomId,
        name: impl Into<String>,
        description: impl Into<String>,
        kind: RoomKind,
        capacity: u32,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let name = name.into();
        Self::validate_name(&name)?;
        Self::validate_capacity(capacity)?;

        Ok(Self {
            id,
            name,
            description: description.into(),
            kind,
            capacity,
            settings: RoomSettings::default(),
            moderators: HashSet::new(),
            bans: Vec::new(),
            mutes: Vec::new(),
            created_at: now,
        })
    }

    /// 返回用户在 `now` 时刻生效的封禁记录
    pub fn active_ban(&self, user_id: UserId, now: DateTime<Utc>) -> Option<&RoomBan> {
        self.bans
            .iter()
            .find(|ban| ban.user_id == user_id && ban.is_active(now))
    }

    /// 用户是否被禁言
    pub fn is_muted(&self, user_id: UserId, now: DateTime<Utc>) -> bool {
        self.mutes
            .iter()
            .any(|mute| mute.user_id == user_id && mute.is_active(now))
    }

    pub fn is_moderator(&self, user_id: UserId) -> bool {
        self.moderators.contains(&user_id)
    }

    pub fn add_moderator(&mut self, user_id: UserId) {
        self.moderators.insert(user_id);
    }

    /// 封禁用户。同一用户的旧记录会被替换，避免名单无限增长。
    pub fn ban_user(
        &mut self,
        user_id: UserId,
        banned_by: UserId,
        reason: Option<String>,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) {
        self.bans.retain(|ban| ban.user_id != user_id);
        self.bans.push(RoomBan {
            user_id,
            reason,
            banned_by,
            banned_at: now,
            expires_at,
        });
    }

    /// 解除封禁，幂等。
    pub fn unban_user(&mut self, user_id: UserId) {
        self.bans.retain(|ban| ban.user_id != user_id);
    }

    /// 禁言用户
    pub fn mute_user(
        &mut self,
        user_id: UserId,
        muted_by: UserId,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) {
        self.mutes.retain(|mute| mute.user_id != user_id);
        self.mutes.push(RoomMute {
            user_id,
            muted_by,
            muted_at: now,
            expires_at,
        });
    }

    /// 解除禁言，幂等。
    pub fn unmute_user(&mut self, user_id: UserId) {
        self.mutes.retain(|mute| mute.user_id != user_id);
    }

    /// 附件是否允许：按类型开关和大小上限检查
    pub fn validate_attachment(&self, mime_type: &str, size: u64) -> DomainResult<()> {
        let is_image = mime_type.starts_with("image/");
        if is_image && !self.settings.allow_images {
            return Err(DomainError::forbidden("该房间不允许发送图片"));
        }
        if !is_image && !self.settings.allow_files {
            return Err(DomainError::forbidden("该房间不允许发送文件"));
        }
        if size > self.settings.max_file_size {
            return Err(DomainError::validation_failed(
                "attachment",
                format!(
                    "附件大小{}字节超过房间上限{}字节",
                    size, self.settings.max_file_size
                ),
            ));
        }
        Ok(())
    }

    fn validate_name(name: &str) -> DomainResult<()> {
        if name.trim().is_empty() {
            return Err(DomainError::validation_failed("name", "房间名称不能为空"));
        }
        if name.len() > 100 {
            return Err(DomainError::validation_failed(
                "name",
                "房间名称不能超过100个字符",
            ));
        }
        Ok(())
    }

    fn validate_capacity(capacity: u32) -> DomainResult<()> {
        if capacity == 0 {
            return Err(DomainError::validation_failed(
                "capacity",
                "容量必须大于0",
            ));
        }
        Ok(())
    }
}
