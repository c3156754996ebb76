//! 应用层：聊天后端的六个核心组件及其协作者接口
//!
//! - 连接注册表（registry）
//! - 房间目录（room_directory）
//! - 在线/打字状态（presence）
//! - 限流器（rate_limiter）
//! - 消息管道（chat_service）
//! - 广播分发核心（dispatcher）

pub mod auth;
pub mod chat_service;
pub mod clock;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod history;
pub mod presence;
pub mod rate_limiter;
pub mod registry;
pub mod repository;
pub mod room_directory;
pub mod storage;
pub mod user_service;

pub use auth::{MemoryTokenBlacklist, TokenBlacklist};
pub use chat_service::{ChatService, ChatServiceDependencies, JoinedRoom, SendMessageRequest};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatcher::{RoomBroadcaster, RoomSubscription, SequenceGuard, SubscriptionError};
pub use error::ApplicationError;
pub use filter::{ContentFilter, NoopFilter, WordListFilter};
pub use history::RoomHistory;
pub use presence::{MemoryPresenceStore, PresenceInfo, PresenceStatus, PresenceStore};
pub use rate_limiter::{RateLimitAction, RateLimiter};
pub use registry::{ConnectionRecord, ConnectionRegistry};
pub use repository::{MessageRepository, RoomRepository, UserRepository};
pub use room_directory::{JoinOutcome, RoomDirectory};
pub use storage::{FileStorage, FileUpload, MemoryFileStorage, StorageError, StoredFile};
pub use user_service::{UserService, UserServiceDependencies};
