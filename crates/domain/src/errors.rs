//! 领域错误定义
//!
//! 错误分类与对外响应一一对应：NotFound / Forbidden / RateLimited /
//! CapacityExceeded / ValidationFailed。

use thiserror::Error;

/// 领域错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 资源不存在
    #[error("资源不存在: {resource} {id}")]
    NotFound { resource: &'static str, id: String },

    /// 禁止操作（被封禁、被禁言、非房间成员等）
    #[error("禁止操作: {reason}")]
    Forbidden { reason: String },

    /// 触发限流，附带重试提示（秒）
    #[error("请求过于频繁，请在{retry_after_secs}秒后重试")]
    RateLimited { retry_after_secs: u64 },

    /// 房间已满
    #[error("房间已满: {room_id}")]
    CapacityExceeded { room_id: String },

    /// 校验失败
    #[error("校验失败: {field}: {reason}")]
    ValidationFailed { field: &'static str, reason: String },
}

impl DomainError {
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden {
            reason: reason.into(),
        }
    }

    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::RateLimited { retry_after_secs }
    }

    pub fn capacity_exceeded(room_id: impl Into<String>) -> Self {
        Self::CapacityExceeded {
            room_id: room_id.into(),
        }
    }

    pub fn validation_failed(field: &'static str, reason: impl Into<String>) -> Self {
        Self::ValidationFailed {
            field,
            reason: reason.into(),
        }
    }
}

/// 领域结果类型
pub type DomainResult<T> = Result<T, DomainError>;

/// 持久化层错误
///
/// 仓储实现（文档库、内存实现）统一映射到这三类。
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("记录不存在")]
    NotFound,
    #[error("记录冲突")]
    Conflict,
    #[error("存储错误: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}
