use std::sync::Arc;

use application::{ChatService, FileStorage, RateLimiter, TokenBlacklist, UserService};
use config::ChatConfig;

use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub user_service: Arc<UserService>,
    pub chat_service: Arc<ChatService>,
    pub jwt_service: Arc<JwtService>,
    pub blacklist: Arc<dyn TokenBlacklist>,
    pub storage: Arc<dyn FileStorage>,
    pub rate_limiter: Arc<RateLimiter>,
    pub chat: ChatConfig,
}
