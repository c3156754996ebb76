//! 用户服务
//!
//! 注册与登录。认证尝试走独立的限流额度（按调用方标识计数，
//! 通常是客户端IP），失败的尝试也消耗点数。

use std::sync::Arc;

use domain::{DomainError, User, UserId, Username};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::rate_limiter::{RateLimitAction, RateLimiter};
use crate::repository::UserRepository;

/// 用户服务的协作者集合
pub struct UserServiceDependencies {
    pub users: Arc<dyn UserRepository>,
    pub rate_limiter: Arc<RateLimiter>,
    pub clock: Arc<dyn Clock>,
}

pub struct UserService {
    deps: UserServiceDependencies,
}

impl UserService {
    pub fn new(deps: UserServiceDependencies) -> Self {
        Self { deps }
    }

    /// 注册新用户。
    ///
    /// caller 是限流主体（客户端IP）。用户名冲突映射为校验失败，
    /// 不泄露存储层细节。
    pub async fn register(
        &self,
        caller: &str,
        username: &str,
        password: &str,
    ) -> Result<User, ApplicationError> {
        let now = self.deps.clock.now();
        self.deps
            .rate_limiter
            .consume(caller, RateLimitAction::Auth, now)?;

        let username = Username::parse(username)?;
        if self
            .deps
            .users
            .find_by_username(&username)
            .await?
            .is_some()
        {
            return Err(DomainError::validation_failed("username", "用户名已被占用").into());
        }

        let user = User::register(username, password, now)?;
        let user = self.deps.users.create(user).await?;
        info!(user_id = %user.id, username = %user.username, "user registered");
        Ok(user)
    }

    /// 登录校验。成功时更新 last_seen 并返回用户。
    ///
    /// 用户不存在和密码错误返回同一个错误，避免枚举用户名。
    pub async fn login(
        &self,
        caller: &str,
        username: &str,
        password: &str,
    ) -> Result<User, ApplicationError> {
        let now = self.deps.clock.now();
        self.deps
            .rate_limiter
            .consume(caller, RateLimitAction::Auth, now)?;

        let username = Username::parse(username)?;
        let Some(mut user) = self.deps.users.find_by_username(&username).await? else {
            warn!(username = %username, "login failed: unknown user");
            return Err(ApplicationError::Authentication);
        };

        if user.is_deactivated {
            warn!(user_id = %user.id, "login rejected: deactivated account");
            return Err(ApplicationError::Authentication);
        }
        if !user.verify_password(password)? {
            warn!(user_id = %user.id, "login failed: bad password");
            return Err(ApplicationError::Authentication);
        }

        user.touch_last_seen(now);
        let user = self.deps.users.update(user).await?;
        info!(user_id = %user.id, "user logged in");
        Ok(user)
    }

    pub async fn find(&self, id: UserId) -> Result<Option<User>, ApplicationError> {
        Ok(self.deps.users.find_by_id(id).await?)
    }
}
