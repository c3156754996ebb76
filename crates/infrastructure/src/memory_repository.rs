//! 内存仓储实现
//!
//! 单机部署和测试用。用户名唯一性在这里保证，和持久化数据库的
//! 唯一索引行为一致。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use application::{MessageRepository, RoomRepository, UserRepository};
use domain::{Message, MessageId, RepositoryError, Room, RoomId, User, UserId, Username};

/// 内存用户仓储
pub struct MemoryUserRepository {
    users: DashMap<UserId, User>,
    /// 用户名 -> 用户ID 的唯一索引
    by_username: DashMap<String, UserId>,
}

impl Default for MemoryUserRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            by_username: DashMap::new(),
        }
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn create(&self, user: User) -> Result<User, RepositoryError> {
        let key = user.username.as_str().to_string();
        // entry 占位保证并发注册同名只有一个成功
        match self.by_username.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(RepositoryError::Conflict),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(user.id);
                self.users.insert(user.id, user.clone());
                Ok(user)
            }
        }
    }

    async fn update(&self, user: User) -> Result<User, RepositoryError> {
        if !self.users.contains_key(&user.id) {
            return Err(RepositoryError::NotFound);
        }
        self.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    async fn find_by_username(
        &self,
        username: &Username,
    ) -> Result<Option<User>, RepositoryError> {
        let Some(id) = self.by_username.get(username.as_str()).map(|e| *e) else {
            return Ok(None);
        };
        Ok(self.users.get(&id).map(|u| u.clone()))
    }
}

/// 内存房间仓储
pub struct MemoryRoomRepository {
    rooms: DashMap<RoomId, Room>,
}

impl Default for MemoryRoomRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRoomRepository {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }
}

#[async_trait]
impl RoomRepository for MemoryRoomRepository {
    async fn upsert(&self, room: Room) -> Result<Room, RepositoryError> {
        self.rooms.insert(room.id.clone(), room.clone());
        Ok(room)
    }

    async fn find_by_id(&self, id: &RoomId) -> Result<Option<Room>, RepositoryError> {
        Ok(self.rooms.get(id).map(|r| r.clone()))
    }

    async fn list(&self) -> Result<Vec<Room>, RepositoryError> {
        let mut rooms: Vec<Room> = self.rooms.iter().map(|r| r.clone()).collect();
        rooms.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        Ok(rooms)
    }

    async fn delete(&self, id: &RoomId) -> Result<(), RepositoryError> {
        self.rooms.remove(id);
        Ok(())
    }
}

/// 内存消息仓储，按房间分桶，桶内按序号有序（追加天然有序）。
pub struct MemoryMessageRepository {
    rooms: DashMap<RoomId, Mutex<VecDeque<Message>>>,
    by_id: DashMap<MessageId, RoomId>,
}

impl Default for MemoryMessageRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMessageRepository {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            by_id: DashMap::new(),
        }
    }
}

#[async_trait]
impl MessageRepository for MemoryMessageRepository {
    async fn append(&self, message: Message) -> Result<(), RepositoryError> {
        self.by_id.insert(message.id, message.room_id.clone());
        let bucket = self
            .rooms
            .entry(message.room_id.clone())
            .or_insert_with(|| Mutex::new(VecDeque::new()));
        bucket
            .lock()
            .expect("message bucket lock poisoned")
            .push_back(message);
        Ok(())
    }

    async fn update(&self, message: Message) -> Result<(), RepositoryError> {
        let Some(bucket) = self.rooms.get(&message.room_id) else {
            return Err(RepositoryError::NotFound);
        };
        let mut messages = bucket.lock().expect("message bucket lock poisoned");
        let Some(slot) = messages.iter_mut().find(|m| m.id == message.id) else {
            return Err(RepositoryError::NotFound);
        };
        *slot = message;
        Ok(())
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        let Some(room_id) = self.by_id.get(&id).map(|e| e.clone()) else {
            return Ok(None);
        };
        let Some(bucket) = self.rooms.get(&room_id) else {
            return Ok(None);
        };
        let messages = bucket.lock().expect("message bucket lock poisoned");
        Ok(messages.iter().find(|m| m.id == id).cloned())
    }

    async fn recent(
        &self,
        room_id: &RoomId,
        limit: usize,
    ) -> Result<Vec<Message>, RepositoryError> {
        let Some(bucket) = self.rooms.get(room_id) else {
            return Ok(Vec::new());
        };
        let messages = bucket.lock().expect("message bucket lock poisoned");
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.iter().skip(skip).cloned().collect())
    }

    async fn count(&self, room_id: &RoomId) -> Result<usize, RepositoryError> {
        Ok(self
            .rooms
            .get(room_id)
            .map(|bucket| bucket.lock().expect("message bucket lock poisoned").len())
            .unwrap_or(0))
    }

    async fn prune_before(
        &self,
        room_id: &RoomId,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, RepositoryError> {
        let Some(bucket) = self.rooms.get(room_id) else {
            return Ok(0);
        };
        let mut messages = bucket.lock().expect("message bucket lock poisoned");
        let mut pruned = 0;
        // 追加天然按时间有序，最旧的在队首
        while let Some(front) = messages.front() {
            if front.created_at >= cutoff {
                break;
            }
            let removed = messages.pop_front().expect("front just observed");
            self.by_id.remove(&removed.id);
            pruned += 1;
        }
        Ok(pruned)
    }
}
