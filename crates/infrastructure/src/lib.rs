//! 基础设施层：应用层协作者接口的具体实现
//!
//! - 内存仓储（单机部署和测试）
//! - Redis 在线状态 / 打字指示器
//! - Redis 令牌黑名单

pub mod memory_repository;
pub mod redis;

pub use memory_repository::{MemoryMessageRepository, MemoryRoomRepository, MemoryUserRepository};
pub use redis::{RedisPresenceStore, RedisTokenBlacklist};
