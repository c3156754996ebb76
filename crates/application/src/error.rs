//! 应用层错误

use domain::{DomainError, RepositoryError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    /// 上游协作者（持久化、对象存储）不可用；管道在广播前中止
    #[error("upstream failure: {0}")]
    Upstream(String),
    #[error("broadcast error: {0}")]
    Broadcast(String),
    #[error("authentication failed")]
    Authentication,
}

impl ApplicationError {
    pub fn upstream(message: impl Into<String>) -> Self {
        ApplicationError::Upstream(message.into())
    }

    pub fn broadcast(message: impl Into<String>) -> Self {
        ApplicationError::Broadcast(message.into())
    }
}
