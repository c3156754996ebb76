//! 仓储接口
//!
//! 持久化是外部协作者（文档库）；核心只依赖这些契约。
//! 参考实现（内存版）在 infrastructure crate。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{Message, MessageId, RepositoryError, Room, RoomId, User, UserId, Username};

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// 创建用户；用户名冲突返回 Conflict。
    async fn create(&self, user: User) -> Result<User, RepositoryError>;
    async fn update(&self, user: User) -> Result<User, RepositoryError>;
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError>;
    async fn find_by_username(
        &self,
        username: &Username,
    ) -> Result<Option<User>, RepositoryError>;
}

#[async_trait]
pub trait RoomRepository: Send + Sync {
    async fn upsert(&self, room: Room) -> Result<Room, RepositoryError>;
    async fn find_by_id(&self, id: &RoomId) -> Result<Option<Room>, RepositoryError>;
    async fn list(&self) -> Result<Vec<Room>, RepositoryError>;
    async fn delete(&self, id: &RoomId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// 追加一条新消息
    async fn append(&self, message: Message) -> Result<(), RepositoryError>;
    /// 覆盖已有消息（编辑、回应、回执）
    async fn update(&self, message: Message) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError>;
    /// 房间最近的 limit 条消息，按序号升序返回
    async fn recent(&self, room_id: &RoomId, limit: usize)
        -> Result<Vec<Message>, RepositoryError>;
    /// 房间内消息总数
    async fn count(&self, room_id: &RoomId) -> Result<usize, RepositoryError>;
    /// 按保留策略清理：删除 cutoff 之前的消息（最旧的先删），返回删除条数
    async fn prune_before(
        &self,
        room_id: &RoomId,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, RepositoryError>;
}
