//! 房间目录
//!
//! 持有房间定义和每个房间的占用集合。加入/退出按房间加锁：
//! 房间A的流量不会成为房间B的瓶颈，同一房间的容量检查串行执行，
//! 并发加入不会超过容量上限。

use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use domain::{DomainError, DomainResult, Room, RoomId, RoomSummary, UserId};

/// 加入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// 新加入
    Joined,
    /// 用户已在房间内，重复加入是无操作
    AlreadyPresent,
}

/// 单个房间的槽位：配置和占用集合各自一把锁。
/// 占用锁的临界区内不做任何 await，封禁/容量检查都在修改前完成，
/// 拒绝时不留下任何部分状态。
struct RoomSlot {
    room: RwLock<Room>,
    occupants: Mutex<HashSet<UserId>>,
}

/// 房间目录
pub struct RoomDirectory {
    rooms: DashMap<RoomId, Arc<RoomSlot>>,
}

impl Default for RoomDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    /// 登记房间（启动时播种或管理员创建）
    pub fn insert_room(&self, room: Room) {
        let slot = Arc::new(RoomSlot {
            room: RwLock::new(room.clone()),
            occupants: Mutex::new(HashSet::new()),
        });
        self.rooms.insert(room.id.clone(), slot);
    }

    /// 管理员删除房间，返回被移除房间的占用者供调用方通知。
    pub fn remove_room(&self, room_id: &RoomId) -> Option<Vec<UserId>> {
        let (_, slot) = self.rooms.remove(room_id)?;
        let occupants = slot.occupants.lock().expect("occupants lock poisoned");
        Some(occupants.iter().copied().collect())
    }

    fn slot(&self, room_id: &RoomId) -> DomainResult<Arc<RoomSlot>> {
        self.rooms
            .get(room_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| DomainError::not_found("room", room_id.as_str()))
    }

    /// 读取房间配置快照
    pub fn get_room(&self, room_id: &RoomId) -> DomainResult<Room> {
        let slot = self.slot(room_id)?;
        let room = slot.room.read().expect("room lock poisoned");
        Ok(room.clone())
    }

    /// 修改房间配置（封禁、禁言、设置），在房间写锁内执行。
    pub fn update_room<F, T>(&self, room_id: &RoomId, mutate: F) -> DomainResult<T>
    where
        F: FnOnce(&mut Room) -> DomainResult<T>,
    {
        let slot = self.slot(room_id)?;
        let mut room = slot.room.write().expect("room lock poisoned");
        mutate(&mut room)
    }

    /// 加入房间。检查顺序：房间存在 -> 封禁 -> 容量，全部通过才修改占用集合。
    pub fn join(
        &self,
        room_id: &RoomId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> DomainResult<JoinOutcome> {
        let slot = self.slot(room_id)?;

        let capacity = {
            let room = slot.room.read().expect("room lock poisoned");
            if room.active_ban(user_id, now).is_some() {
                // 封禁原因只对版主可见，这里不外泄
                return Err(DomainError::forbidden("您已被禁止加入该房间"));
            }
            room.capacity
        };

        let mut occupants = slot.occupants.lock().expect("occupants lock poisoned");
        if occupants.contains(&user_id) {
            return Ok(JoinOutcome::AlreadyPresent);
        }
        if occupants.len() as u32 >= capacity {
            return Err(DomainError::capacity_exceeded(room_id.as_str()));
        }
        occupants.insert(user_id);
        Ok(JoinOutcome::Joined)
    }

    /// 退出房间，幂等：不在房间内时是无操作，永不报错。
    pub fn leave(&self, room_id: &RoomId, user_id: UserId) {
        if let Some(entry) = self.rooms.get(room_id) {
            let mut occupants = entry.occupants.lock().expect("occupants lock poisoned");
            occupants.remove(&user_id);
        }
    }

    /// 房间占用者集合
    pub fn list_occupants(&self, room_id: &RoomId) -> DomainResult<HashSet<UserId>> {
        let slot = self.slot(room_id)?;
        let occupants = slot.occupants.lock().expect("occupants lock poisoned");
        Ok(occupants.clone())
    }

    /// 用户是否占用该房间
    pub fn is_occupant(&self, room_id: &RoomId, user_id: UserId) -> bool {
        self.rooms
            .get(room_id)
            .map(|entry| {
                entry
                    .occupants
                    .lock()
                    .expect("occupants lock poisoned")
                    .contains(&user_id)
            })
            .unwrap_or(false)
    }

    /// 封禁检查（过期封禁不算数）
    pub fn is_banned(&self, room_id: &RoomId, user_id: UserId, now: DateTime<Utc>) -> bool {
        self.rooms
            .get(room_id)
            .map(|entry| {
                entry
                    .room
                    .read()
                    .expect("room lock poisoned")
                    .active_ban(user_id, now)
                    .is_some()
            })
            .unwrap_or(false)
    }

    /// 全部房间摘要（含实时占用数）
    pub fn summaries(&self) -> Vec<RoomSummary> {
        let mut summaries: Vec<RoomSummary> = self
            .rooms
            .iter()
            .map(|entry| {
                let room = entry.room.read().expect("room lock poisoned");
                let occupants = entry.occupants.lock().expect("occupants lock poisoned");
                RoomSummary {
                    id: room.id.clone(),
                    name: room.name.clone(),
                    description: room.description.clone(),
                    kind: room.kind,
                    capacity: room.capacity,
                    occupants: occupants.len() as u32,
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        summaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use domain::RoomKind;
    use uuid::Uuid;

    fn directory_with(id: &str, capacity: u32) -> RoomDirectory {
        let directory = RoomDirectory::new();
        directory.insert_room(
            Room::new(
                RoomId::parse(id).unwrap(),
                "Test Room",
                "",
                RoomKind::Public,
                capacity,
                Utc::now(),
            )
            .unwrap(),
        );
        directory
    }

    fn user() -> UserId {
        UserId::new(Uuid::new_v4())
    }

    #[test]
    fn join_missing_room_fails() {
        let directory = RoomDirectory::new();
        let room_id = RoomId::parse("nope").unwrap();
        let result = directory.join(&room_id, user(), Utc::now());
        assert!(matches!(result, Err(DomainError::NotFound { .. })));
    }

    #[test]
    fn join_is_idempotent() {
        let directory = directory_with("general", 10);
        let room_id = RoomId::parse("general").unwrap();
        let alice = user();
        let now = Utc::now();

        assert_eq!(directory.join(&room_id, alice, now).unwrap(), JoinOutcome::Joined);
        assert_eq!(
            directory.join(&room_id, alice, now).unwrap(),
            JoinOutcome::AlreadyPresent
        );
        assert_eq!(directory.list_occupants(&room_id).unwrap().len(), 1);
    }

    #[test]
    fn capacity_scenario() {
        // 场景：容量2的房间，A、B加入成功，C被拒，A退出后C可进
        let directory = directory_with("general", 2);
        let room_id = RoomId::parse("general").unwrap();
        let (a, b, c) = (user(), user(), user());
        let now = Utc::now();

        assert!(directory.join(&room_id, a, now).is_ok());
        assert!(directory.join(&room_id, b, now).is_ok());

        let rejected = directory.join(&room_id, c, now);
        assert!(matches!(rejected, Err(DomainError::CapacityExceeded { .. })));
        // 拒绝不留下部分状态
        assert_eq!(directory.list_occupants(&room_id).unwrap().len(), 2);

        directory.leave(&room_id, a);
        assert!(directory.join(&room_id, c, now).is_ok());
    }

    #[test]
    fn banned_user_cannot_join() {
        let directory = directory_with("general", 10);
        let room_id = RoomId::parse("general").unwrap();
        let target = user();
        let moderator = user();
        let now = Utc::now();

        directory
            .update_room(&room_id, |room| {
                room.ban_user(target, moderator, Some("spam".into()), None, now);
                Ok(())
            })
            .unwrap();

        let result = directory.join(&room_id, target, now);
        assert!(matches!(result, Err(DomainError::Forbidden { .. })));
        assert!(directory.list_occupants(&room_id).unwrap().is_empty());
        assert!(directory.is_banned(&room_id, target, now));
    }

    #[test]
    fn expired_ban_allows_join() {
        let directory = directory_with("general", 10);
        let room_id = RoomId::parse("general").unwrap();
        let target = user();
        let moderator = user();
        let now = Utc::now();

        directory
            .update_room(&room_id, |room| {
                room.ban_user(target, moderator, None, Some(now + Duration::minutes(5)), now);
                Ok(())
            })
            .unwrap();

        let later = now + Duration::minutes(6);
        assert!(!directory.is_banned(&room_id, target, later));
        assert!(directory.join(&room_id, target, later).is_ok());
    }

    #[test]
    fn leave_is_idempotent() {
        let directory = directory_with("general", 10);
        let room_id = RoomId::parse("general").unwrap();
        let alice = user();

        // 未加入时退出不报错
        directory.leave(&room_id, alice);

        directory.join(&room_id, alice, Utc::now()).unwrap();
        directory.leave(&room_id, alice);
        directory.leave(&room_id, alice);
        assert!(directory.list_occupants(&room_id).unwrap().is_empty());
    }

    #[test]
    fn summaries_include_occupancy() {
        let directory = directory_with("general", 10);
        let room_id = RoomId::parse("general").unwrap();
        directory.join(&room_id, user(), Utc::now()).unwrap();

        let summaries = directory.summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].occupants, 1);
        assert_eq!(summaries[0].capacity, 10);
    }
}
