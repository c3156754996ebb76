//! 在线状态与打字指示器
//!
//! 打字条目带TTL自动过期——这是正确性要求而不是优化：断开事件丢失时
//! "正在打字"的幽灵指示最多存活一个TTL窗口。过期判断以注入的时间
//! 参数为准，读取时惰性清理。

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use domain::{RoomId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ApplicationError;

/// 在线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Away,
    Offline,
}

/// 在线信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceInfo {
    pub status: PresenceStatus,
    pub last_seen: DateTime<Utc>,
}

/// 在线状态存储接口
///
/// 生产部署用Redis实现（哈希 + 带TTL的打字键），测试和单机部署
/// 用内存实现。
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// 更新用户在线状态
    async fn set_presence(
        &self,
        user_id: UserId,
        status: PresenceStatus,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError>;

    /// 查询用户在线状态
    async fn get_presence(
        &self,
        user_id: UserId,
    ) -> Result<Option<PresenceInfo>, ApplicationError>;

    /// 设置打字状态；is_typing=false 立即清除，true 则在TTL后自动过期
    async fn set_typing(
        &self,
        room_id: &RoomId,
        user_id: UserId,
        is_typing: bool,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError>;

    /// 房间内未过期的打字用户集合
    async fn typing_users(
        &self,
        room_id: &RoomId,
        now: DateTime<Utc>,
    ) -> Result<Vec<UserId>, ApplicationError>;

    /// 清除用户在某房间的打字状态（退出/断开时的级联清理）
    async fn clear_typing(
        &self,
        room_id: &RoomId,
        user_id: UserId,
    ) -> Result<(), ApplicationError>;
}

/// 内存实现的在线状态存储
pub struct MemoryPresenceStore {
    ttl: Duration,
    presence: DashMap<UserId, PresenceInfo>,
    /// 房间 -> (用户 -> 过期时刻)
    typing: DashMap<RoomId, HashMap<UserId, DateTime<Utc>>>,
}

impl MemoryPresenceStore {
    pub fn new(typing_ttl_secs: u64) -> Self {
        Self {
            ttl: Duration::seconds(typing_ttl_secs as i64),
            presence: DashMap::new(),
            typing: DashMap::new(),
        }
    }
}

impl Default for MemoryPresenceStore {
    fn default() -> Self {
        Self::new(5)
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn set_presence(
        &self,
        user_id: UserId,
        status: PresenceStatus,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        self.presence.insert(
            user_id,
            PresenceInfo {
                status,
                last_seen: now,
            },
        );
        Ok(())
    }

    async fn get_presence(
        &self,
        user_id: UserId,
    ) -> Result<Option<PresenceInfo>, ApplicationError> {
        Ok(self.presence.get(&user_id).map(|entry| entry.clone()))
    }

    async fn set_typing(
        &self,
        room_id: &RoomId,
        user_id: UserId,
        is_typing: bool,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        let mut entry = self.typing.entry(room_id.clone()).or_default();
        if is_typing {
            entry.insert(user_id, now + self.ttl);
        } else {
            entry.remove(&user_id);
        }
        Ok(())
    }

    async fn typing_users(
        &self,
        room_id: &RoomId,
        now: DateTime<Utc>,
    ) -> Result<Vec<UserId>, ApplicationError> {
        let Some(mut entry) = self.typing.get_mut(room_id) else {
            return Ok(Vec::new());
        };
        // 读取时顺带清理过期条目
        entry.retain(|_, expires_at| *expires_at > now);
        Ok(entry.keys().copied().collect())
    }

    async fn clear_typing(
        &self,
        room_id: &RoomId,
        user_id: UserId,
    ) -> Result<(), ApplicationError> {
        if let Some(mut entry) = self.typing.get_mut(room_id) {
            entry.remove(&user_id);
        }
        Ok(())
    }
}
