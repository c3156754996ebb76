//! 用户实体定义
//!
//! 用户是持久身份：注册时创建，登录与资料更新时修改，只做软删除。
//! 核心服务只读取用户信息并更新 last_seen，其余修改由外部入口完成。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{UserId, Username};

/// 用户实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// 用户唯一ID
    pub id: UserId,
    /// 用户名（全局唯一）
    pub username: Username,
    /// 凭证哈希（bcrypt）
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// 头像标识
    pub avatar: Option<String>,
    /// 界面主题
    pub theme: Option<String>,
    /// 首选语言
    pub preferred_language: String,
    /// 管理员标志
    pub is_admin: bool,
    /// 是否已停用（软删除）
    pub is_deactivated: bool,
    /// 最后在线时间
    pub last_seen: DateTime<Utc>,
    /// 注册时间
    pub created_at: DateTime<Utc>,
}

impl User {
    /// 注册新用户，密码在这里完成哈希。
    pub fn register(
        username: Username,
        password: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        Self::validate_password(password)?;

        let password_hash = bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(|e| {
            DomainError::validation_failed("password", format!("密码哈希失败: {}", e))
        })?;

        Ok(Self {
            id: UserId::new(Uuid::new_v4()),
            username,
            password_hash,
            avatar: None,
            theme: None,
            preferred_language: "en".to_string(),
            is_admin: false,
            is_deactivated: false,
            last_seen: now,
            created_at: now,
        })
    }

    /// 验证登录密码
    pub fn verify_password(&self, password: &str) -> DomainResult<bool> {
        bcrypt::verify(password, &self.password_hash).map_err(|e| {
            DomainError::validation_failed("password", format!("密码验证失败: {}", e))
        })
    }

    /// 更新最后在线时间
    pub fn touch_last_seen(&mut self, now: DateTime<Utc>) {
        self.last_seen = now;
    }

    /// 停用账号（软删除，不做物理删除）
    pub fn deactivate(&mut self) {
        self.is_deactivated = true;
    }

    /// 更新资料字段
    pub fn update_profile(
        &mut self,
        avatar: Option<String>,
        theme: Option<String>,
        preferred_language: Option<String>,
    ) {
        if avatar.is_some() {
            self.avatar = avatar;
        }
        if theme.is_some() {
            self.theme = theme;
        }
        if let Some(language) = preferred_language {
            self.preferred_language = language;
        }
    }

    fn validate_password(password: &str) -> DomainResult<()> {
        if password.len() < 6 {
            return Err(DomainError::validation_failed(
                "password",
                "密码长度至少6个字符",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn username(s: &str) -> Username {
        Username::parse(s).unwrap()
    }

    #[test]
    fn register_hashes_password() {
        let now = Utc::now();
        let user = User::register(username("alice"), "secret123", now).unwrap();

        assert_ne!(user.password_hash, "secret123");
        assert!(user.verify_password("secret123").unwrap());
        assert!(!user.verify_password("wrong").unwrap());
        assert!(!user.is_admin);
        assert!(!user.is_deactivated);
    }

    #[test]
    fn short_password_rejected() {
        let now = Utc::now();
        assert!(User::register(username("alice"), "abc", now).is_err());
    }

    #[test]
    fn deactivate_is_soft() {
        let now = Utc::now();
        let mut user = User::register(username("alice"), "secret123", now).unwrap();
        user.deactivate();
        assert!(user.is_deactivated);
        // 软删除后身份信息仍然保留
        assert_eq!(user.username.as_str(), "alice");
    }
}
