//! 房间内存历史缓冲
//!
//! 每个房间一个有界环形缓冲（默认1000条），超出即淘汰最旧的。
//! 这是快速路径缓存：加入房间时的历史回放从这里出，
//! 与持久保留策略无关。

use std::collections::VecDeque;
use std::sync::Mutex;

use dashmap::DashMap;
use domain::{Message, RoomId};

pub struct RoomHistory {
    capacity: usize,
    rooms: DashMap<RoomId, Mutex<VecDeque<Message>>>,
}

impl RoomHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            rooms: DashMap::new(),
        }
    }

    /// 追加消息，满了先淘汰最旧的。
    pub fn push(&self, message: Message) {
        let entry = self
            .rooms
            .entry(message.room_id.clone())
            .or_insert_with(|| Mutex::new(VecDeque::with_capacity(self.capacity.min(64))));
        let mut buffer = entry.lock().expect("history lock poisoned");
        if buffer.len() == self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(message);
    }

    /// 最近的 limit 条消息，按时间顺序（旧到新）。
    pub fn recent(&self, room_id: &RoomId, limit: usize) -> Vec<Message> {
        let Some(entry) = self.rooms.get(room_id) else {
            return Vec::new();
        };
        let buffer = entry.lock().expect("history lock poisoned");
        let skip = buffer.len().saturating_sub(limit);
        buffer.iter().skip(skip).cloned().collect()
    }

    /// 替换缓冲中已存在的消息（编辑/回应后同步快照）。
    pub fn replace(&self, message: &Message) {
        if let Some(entry) = self.rooms.get(&message.room_id) {
            let mut buffer = entry.lock().expect("history lock poisoned");
            if let Some(slot) = buffer.iter_mut().find(|m| m.id == message.id) {
                *slot = message.clone();
            }
        }
    }

    pub fn len(&self, room_id: &RoomId) -> usize {
        self.rooms
            .get(room_id)
            .map(|entry| entry.lock().expect("history lock poisoned").len())
            .unwrap_or(0)
    }

    /// 删除整个房间的缓冲（房间被管理员销毁时）。
    pub fn remove_room(&self, room_id: &RoomId) {
        self.rooms.remove(room_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::{MessageKind, SenderSnapshot, UserId, Username};
    use uuid::Uuid;

    fn message(room: &str, seq: u64, content: &str) -> Message {
        Message::new(
            seq,
            RoomId::parse(room).unwrap(),
            SenderSnapshot {
                user_id: UserId::new(Uuid::new_v4()),
                display_name: Username::parse("alice").unwrap(),
            },
            content,
            MessageKind::Text,
            None,
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn capped_eviction_drops_oldest() {
        let history = RoomHistory::new(3);
        let room = RoomId::parse("general").unwrap();

        for seq in 1..=5 {
            history.push(message("general", seq, &format!("m{}", seq)));
        }

        let recent = history.recent(&room, 10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].content, "m3");
        assert_eq!(recent[2].content, "m5");
    }

    #[test]
    fn recent_limits_and_orders() {
        let history = RoomHistory::new(100);
        let room = RoomId::parse("general").unwrap();
        for seq in 1..=10 {
            history.push(message("general", seq, &format!("m{}", seq)));
        }

        let last_three = history.recent(&room, 3);
        assert_eq!(last_three.len(), 3);
        assert_eq!(last_three[0].content, "m8");
        assert_eq!(last_three[2].content, "m10");
    }

    #[test]
    fn rooms_are_isolated() {
        let history = RoomHistory::new(10);
        history.push(message("general", 1, "hello"));

        assert_eq!(history.len(&RoomId::parse("general").unwrap()), 1);
        assert!(history.recent(&RoomId::parse("tech").unwrap(), 10).is_empty());
    }

    #[test]
    fn replace_updates_snapshot() {
        let history = RoomHistory::new(10);
        let room = RoomId::parse("general").unwrap();
        let mut m = message("general", 1, "original");
        history.push(m.clone());

        m.edit("edited", Utc::now()).unwrap();
        history.replace(&m);

        assert_eq!(history.recent(&room, 1)[0].content, "edited");
    }
}
