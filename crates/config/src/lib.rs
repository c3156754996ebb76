//! 统一配置中心
//!
//! 提供应用的全局配置管理，包括：
//! - 服务器监听地址
//! - JWT认证
//! - Redis缓存
//! - 聊天行为参数（历史缓冲、打字TTL、广播队列）
//! - 各动作的限流额度

use serde::{Deserialize, Serialize};
use std::env;

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务配置
    pub server: ServerConfig,
    /// JWT认证配置
    pub jwt: JwtConfig,
    /// Redis配置（缺省时退回进程内实现）
    pub redis: RedisConfig,
    /// 聊天行为配置
    pub chat: ChatConfig,
    /// 限流配置
    pub rate_limits: RateLimitConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// JWT配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub expiration_hours: i64,
}

/// Redis配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// 为 None 时在线状态/黑名单使用内存实现
    pub url: Option<String>,
}

/// 聊天行为配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// 每个房间内存历史缓冲上限
    pub history_capacity: usize,
    /// 加入房间时回放的历史条数
    pub history_replay: usize,
    /// 打字指示器TTL（秒）
    pub typing_ttl_secs: u64,
    /// 每房间广播通道容量
    pub broadcast_capacity: usize,
    /// 每连接出站队列上限，溢出即断开慢消费者
    pub outbound_queue: usize,
    /// 上传接口大小上限（字节）
    pub max_upload_size: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_capacity: 1000,
            history_replay: 50,
            typing_ttl_secs: 5,
            broadcast_capacity: 256,
            outbound_queue: 64,
            max_upload_size: 5 * 1024 * 1024,
        }
    }
}

/// 单个动作的限流额度
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Quota {
    /// 窗口内允许的次数
    pub points: u32,
    /// 窗口长度（秒）
    pub window_secs: u64,
}

/// 各动作的限流配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub api: Quota,
    pub auth: Quota,
    pub message: Quota,
    pub room_join: Quota,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            api: Quota {
                points: 100,
                window_secs: 60,
            },
            auth: Quota {
                points: 5,
                window_secs: 15 * 60,
            },
            message: Quota {
                points: 30,
                window_secs: 60,
            },
            room_join: Quota {
                points: 10,
                window_secs: 60,
            },
        }
    }
}

impl AppConfig {
    /// 从环境变量加载配置
    /// JWT_SECRET 缺失会 panic，确保生产环境不会落到不安全默认值
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
                port: env_parsed("SERVER_PORT", 8080),
            },
            jwt: JwtConfig {
                secret: env::var("JWT_SECRET")
                    .expect("JWT_SECRET environment variable is required for production safety"),
                expiration_hours: env_parsed("JWT_EXPIRATION_HOURS", 24),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").ok(),
            },
            chat: ChatConfig {
                history_capacity: env_parsed("CHAT_HISTORY_CAPACITY", 1000),
                history_replay: env_parsed("CHAT_HISTORY_REPLAY", 50),
                typing_ttl_secs: env_parsed("CHAT_TYPING_TTL_SECS", 5),
                broadcast_capacity: env_parsed("CHAT_BROADCAST_CAPACITY", 256),
                outbound_queue: env_parsed("CHAT_OUTBOUND_QUEUE", 64),
                max_upload_size: env_parsed("CHAT_MAX_UPLOAD_SIZE", 5 * 1024 * 1024),
            },
            rate_limits: RateLimitConfig::default(),
        }
    }

    /// 从环境变量加载配置，开发环境版本
    /// 提供不安全的默认值，仅用于测试和开发
    pub fn from_env_with_defaults() -> Self {
        Self {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
                port: env_parsed("SERVER_PORT", 8080),
            },
            jwt: JwtConfig {
                secret: env::var("JWT_SECRET").unwrap_or_else(|_| {
                    "dev-secret-key-not-for-production-use-minimum-32-chars".to_string()
                }),
                expiration_hours: env_parsed("JWT_EXPIRATION_HOURS", 24),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").ok(),
            },
            chat: ChatConfig::default(),
            rate_limits: RateLimitConfig::default(),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
