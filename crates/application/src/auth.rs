//! 令牌吊销
//!
//! 登出把令牌标识放进黑名单，保留到令牌自然过期为止。
//! Redis 实现见 infrastructure crate，这里是契约和内存版。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::error::ApplicationError;

/// 令牌黑名单接口
#[async_trait]
pub trait TokenBlacklist: Send + Sync {
    /// 吊销令牌，条目保留到 expires_at。
    async fn revoke(
        &self,
        token_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), ApplicationError>;

    async fn is_revoked(&self, token_id: &str) -> Result<bool, ApplicationError>;
}

/// 内存黑名单，过期条目在查询时惰性清除。
pub struct MemoryTokenBlacklist {
    entries: DashMap<String, DateTime<Utc>>,
}

impl Default for MemoryTokenBlacklist {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTokenBlacklist {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

#[async_trait]
impl TokenBlacklist for MemoryTokenBlacklist {
    async fn revoke(
        &self,
        token_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        self.entries.insert(token_id.to_string(), expires_at);
        Ok(())
    }

    async fn is_revoked(&self, token_id: &str) -> Result<bool, ApplicationError> {
        let now = Utc::now();
        let expires_at = self.entries.get(token_id).map(|entry| *entry);
        match expires_at {
            Some(expires_at) if expires_at > now => Ok(true),
            Some(_) => {
                self.entries.remove(token_id);
                Ok(false)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn revoked_token_is_flagged() {
        let blacklist = MemoryTokenBlacklist::new();
        blacklist
            .revoke("jti-1", Utc::now() + Duration::hours(1))
            .await
            .unwrap();

        assert!(blacklist.is_revoked("jti-1").await.unwrap());
        assert!(!blacklist.is_revoked("jti-2").await.unwrap());
    }

    #[tokio::test]
    async fn expired_entry_is_forgotten() {
        let blacklist = MemoryTokenBlacklist::new();
        blacklist
            .revoke("jti-1", Utc::now() - Duration::seconds(1))
            .await
            .unwrap();

        assert!(!blacklist.is_revoked("jti-1").await.unwrap());
    }
}
