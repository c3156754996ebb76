//! Redis 在线状态存储
//!
//! 在线状态存哈希 presence:{user_id}，打字状态存带TTL的
//! typing:{room_id}:{user_id} 键，过期由 Redis 负责。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::warn;

use application::{ApplicationError, PresenceInfo, PresenceStatus, PresenceStore};
use domain::{RoomId, UserId};

use super::map_redis_err;

#[derive(Clone)]
pub struct RedisPresenceStore {
    connection: ConnectionManager,
    typing_ttl_secs: u64,
}

impl RedisPresenceStore {
    pub async fn connect(url: &str, typing_ttl_secs: u64) -> Result<Self, ApplicationError> {
        let client = redis::Client::open(url).map_err(map_redis_err)?;
        let connection = ConnectionManager::new(client).await.map_err(map_redis_err)?;
        Ok(Self {
            connection,
            typing_ttl_secs,
        })
    }

    fn presence_key(user_id: UserId) -> String {
        format!("presence:{}", user_id)
    }

    fn typing_key(room_id: &RoomId, user_id: UserId) -> String {
        format!("typing:{}:{}", room_id, user_id)
    }

    fn typing_pattern(room_id: &RoomId) -> String {
        format!("typing:{}:*", room_id)
    }
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    async fn set_presence(
        &self,
        user_id: UserId,
        status: PresenceStatus,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        let mut conn = self.connection.clone();
        let info = PresenceInfo {
            status,
            last_seen: now,
        };
        let payload =
            serde_json::to_string(&info).map_err(|e| ApplicationError::upstream(e.to_string()))?;
        conn.set::<_, _, ()>(Self::presence_key(user_id), payload)
            .await
            .map_err(map_redis_err)
    }

    async fn get_presence(
        &self,
        user_id: UserId,
    ) -> Result<Option<PresenceInfo>, ApplicationError> {
        let mut conn = self.connection.clone();
        let payload: Option<String> = conn
            .get(Self::presence_key(user_id))
            .await
            .map_err(map_redis_err)?;

        match payload {
            Some(payload) => match serde_json::from_str(&payload) {
                Ok(info) => Ok(Some(info)),
                Err(e) => {
                    // 坏数据当作不存在处理，不让单个键拖垮查询
                    warn!(user_id = %user_id, error = %e, "corrupt presence entry ignored");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn set_typing(
        &self,
        room_id: &RoomId,
        user_id: UserId,
        is_typing: bool,
        _now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        let mut conn = self.connection.clone();
        let key = Self::typing_key(room_id, user_id);
        if is_typing {
            conn.set_ex::<_, _, ()>(key, "1", self.typing_ttl_secs)
                .await
                .map_err(map_redis_err)
        } else {
            conn.del::<_, ()>(key).await.map_err(map_redis_err)
        }
    }

    async fn typing_users(
        &self,
        room_id: &RoomId,
        _now: DateTime<Utc>,
    ) -> Result<Vec<UserId>, ApplicationError> {
        let mut conn = self.connection.clone();
        let pattern = Self::typing_pattern(room_id);
        let prefix = format!("typing:{}:", room_id);

        let mut users = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(map_redis_err)?;

            for key in keys {
                if let Some(raw) = key.strip_prefix(&prefix) {
                    if let Ok(uuid) = raw.parse() {
                        users.push(UserId::new(uuid));
                    }
                }
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(users)
    }

    async fn clear_typing(
        &self,
        room_id: &RoomId,
        user_id: UserId,
    ) -> Result<(), ApplicationError> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(Self::typing_key(room_id, user_id))
            .await
            .map_err(map_redis_err)
    }
}
