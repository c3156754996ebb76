//! Redis 实现
//!
//! 多实例部署时在线状态和令牌黑名单放 Redis：
//! 打字指示器和黑名单条目直接用键过期，不需要后台清理任务。

pub mod blacklist;
pub mod presence;

pub use blacklist::RedisTokenBlacklist;
pub use presence::RedisPresenceStore;

use application::ApplicationError;

pub(crate) fn map_redis_err(err: redis::RedisError) -> ApplicationError {
    ApplicationError::upstream(format!("redis: {}", err))
}
