//! Redis 令牌黑名单
//!
//! 登出时按令牌剩余有效期 SETEX，之后由 Redis 自动过期，
//! 黑名单不会无界增长。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use application::{ApplicationError, TokenBlacklist};

use super::map_redis_err;

#[derive(Clone)]
pub struct RedisTokenBlacklist {
    connection: ConnectionManager,
}

impl RedisTokenBlacklist {
    pub async fn connect(url: &str) -> Result<Self, ApplicationError> {
        let client = redis::Client::open(url).map_err(map_redis_err)?;
        let connection = ConnectionManager::new(client).await.map_err(map_redis_err)?;
        Ok(Self { connection })
    }

    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    fn key(token_id: &str) -> String {
        format!("token_blacklist:{}", token_id)
    }
}

#[async_trait]
impl TokenBlacklist for RedisTokenBlacklist {
    async fn revoke(
        &self,
        token_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        let remaining = (expires_at - Utc::now()).num_seconds();
        if remaining <= 0 {
            // 已过期的令牌没必要入黑名单
            return Ok(());
        }

        let mut conn = self.connection.clone();
        conn.set_ex::<_, _, ()>(Self::key(token_id), "1", remaining as u64)
            .await
            .map_err(map_redis_err)
    }

    async fn is_revoked(&self, token_id: &str) -> Result<bool, ApplicationError> {
        let mut conn = self.connection.clone();
        conn.exists(Self::key(token_id)).await.map_err(map_redis_err)
    }
}
