//! 连接注册表
//!
//! 把短暂的连接标识映射到用户身份，并记录连接当前所在的房间。
//! 连接记录由注册表独占持有；房间目录只保存用户ID引用。
//!
//! 注销只移除记录本身，级联清理（房间退出、打字状态清除）由调用方
//! 按约定执行，见 ChatService::disconnect。

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use domain::{ConnectionId, RoomId, UserId, Username};

/// 单个连接的记录
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub display_name: Username,
    /// 当前所在房间；一个连接同一时刻最多占用一个房间
    pub current_room: Option<RoomId>,
    pub connected_at: DateTime<Utc>,
}

/// 连接注册表
///
/// 所有操作 O(1)；按连接ID分片，不同连接互不阻塞。
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionRecord>,
    /// 用户ID -> (展示名, 活跃连接数)，用于把打字集合解析成用户名
    display_names: DashMap<UserId, (Username, usize)>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            display_names: DashMap::new(),
        }
    }

    /// 握手成功后登记连接
    pub fn register(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        display_name: Username,
        now: DateTime<Utc>,
    ) -> ConnectionRecord {
        let record = ConnectionRecord {
            connection_id,
            user_id,
            display_name: display_name.clone(),
            current_room: None,
            connected_at: now,
        };

        self.connections.insert(connection_id, record.clone());
        self.display_names
            .entry(user_id)
            .and_modify(|(name, count)| {
                *name = display_name.clone();
                *count += 1;
            })
            .or_insert((display_name, 1));

        record
    }

    /// 注销连接，幂等；返回被移除的记录供调用方做级联清理。
    pub fn unregister(&self, connection_id: ConnectionId) -> Option<ConnectionRecord> {
        let (_, record) = self.connections.remove(&connection_id)?;

        if let Some(mut entry) = self.display_names.get_mut(&record.user_id) {
            entry.1 = entry.1.saturating_sub(1);
            let drained = entry.1 == 0;
            drop(entry);
            if drained {
                self.display_names
                    .remove_if(&record.user_id, |_, (_, count)| *count == 0);
            }
        }

        Some(record)
    }

    pub fn lookup(&self, connection_id: ConnectionId) -> Option<ConnectionRecord> {
        self.connections
            .get(&connection_id)
            .map(|entry| entry.clone())
    }

    /// 原子替换连接的当前房间，返回之前占用的房间。
    /// 连接不会出现同时指向两个房间的中间状态。
    pub fn set_current_room(
        &self,
        connection_id: ConnectionId,
        room_id: Option<RoomId>,
    ) -> Option<Option<RoomId>> {
        let mut entry = self.connections.get_mut(&connection_id)?;
        let previous = entry.current_room.take();
        entry.current_room = room_id;
        Some(previous)
    }

    /// 查询用户当前的展示名（任一在线连接的快照）
    pub fn display_name(&self, user_id: UserId) -> Option<Username> {
        self.display_names
            .get(&user_id)
            .map(|entry| entry.0.clone())
    }

    /// 当前连接总数
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn username(s: &str) -> Username {
        Username::parse(s).unwrap()
    }

    fn room(s: &str) -> RoomId {
        RoomId::parse(s).unwrap()
    }

    #[test]
    fn register_and_lookup() {
        let registry = ConnectionRegistry::new();
        let conn = ConnectionId::generate();
        let user = UserId::new(Uuid::new_v4());

        registry.register(conn, user, username("alice"), Utc::now());

        let record = registry.lookup(conn).unwrap();
        assert_eq!(record.user_id, user);
        assert!(record.current_room.is_none());
        assert_eq!(registry.display_name(user).unwrap().as_str(), "alice");
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let conn = ConnectionId::generate();
        let user = UserId::new(Uuid::new_v4());

        registry.register(conn, user, username("alice"), Utc::now());
        assert!(registry.unregister(conn).is_some());
        assert!(registry.unregister(conn).is_none());
        assert!(registry.lookup(conn).is_none());
        // 最后一个连接注销后展示名索引也被清掉
        assert!(registry.display_name(user).is_none());
    }

    #[test]
    fn set_current_room_replaces_previous() {
        let registry = ConnectionRegistry::new();
        let conn = ConnectionId::generate();
        let user = UserId::new(Uuid::new_v4());
        registry.register(conn, user, username("alice"), Utc::now());

        let previous = registry.set_current_room(conn, Some(room("general"))).unwrap();
        assert_eq!(previous, None);

        let previous = registry.set_current_room(conn, Some(room("tech"))).unwrap();
        assert_eq!(previous, Some(room("general")));
        assert_eq!(registry.lookup(conn).unwrap().current_room, Some(room("tech")));

        let previous = registry.set_current_room(conn, None).unwrap();
        assert_eq!(previous, Some(room("tech")));
    }

    #[test]
    fn display_name_survives_one_of_two_connections() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new(Uuid::new_v4());
        let first = ConnectionId::generate();
        let second = ConnectionId::generate();

        registry.register(first, user, username("alice"), Utc::now());
        registry.register(second, user, username("alice"), Utc::now());

        registry.unregister(first);
        assert!(registry.display_name(user).is_some());

        registry.unregister(second);
        assert!(registry.display_name(user).is_none());
    }
}
