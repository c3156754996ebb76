//! 广播分发核心
//!
//! 每个房间一条独立的 tokio broadcast 通道：发布是非阻塞扇出，
//! 不同房间互不干扰。消息序号由房间级异步互斥锁把守，
//! 持有锁期间完成"取号->持久化->广播"，保证房间内全序。
//! 慢消费者由通道的滞后检测捕获，由连接层断开处理。

use std::sync::Arc;

use dashmap::DashMap;
use domain::{RoomId, ServerEvent};
use tokio::sync::broadcast;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// 订阅端拉取事件的结果
#[derive(Debug, PartialEq, Eq)]
pub enum SubscriptionError {
    /// 消费太慢，错过了 n 条事件；连接层应当断开该订阅者
    Lagged(u64),
    /// 房间通道已关闭
    Closed,
}

/// 单个连接对单个房间的订阅
pub struct RoomSubscription {
    receiver: broadcast::Receiver<ServerEvent>,
}

impl RoomSubscription {
    pub async fn recv(&mut self) -> Result<ServerEvent, SubscriptionError> {
        match self.receiver.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                Err(SubscriptionError::Lagged(missed))
            }
            Err(broadcast::error::RecvError::Closed) => Err(SubscriptionError::Closed),
        }
    }
}

struct RoomChannel {
    sender: broadcast::Sender<ServerEvent>,
    /// 下一条消息的序号，同时充当房间的发布串行闸门
    next_seq: Arc<Mutex<u64>>,
}

/// 房间序号闸门的持有凭证。
///
/// peek 读取将要分配的序号；持久化和广播成功后 commit 前进一格。
/// 中途失败直接丢弃凭证，序号不被消耗。
pub struct SequenceGuard {
    guard: OwnedMutexGuard<u64>,
}

impl SequenceGuard {
    pub fn peek(&self) -> u64 {
        *self.guard
    }

    pub fn commit(mut self) -> u64 {
        let seq = *self.guard;
        *self.guard += 1;
        seq
    }
}

/// 按房间划分的广播器
pub struct RoomBroadcaster {
    capacity: usize,
    rooms: DashMap<RoomId, RoomChannel>,
}

impl RoomBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            rooms: DashMap::new(),
        }
    }

    /// 注册房间通道，指定起始序号（从持久化恢复时传已有条数+1）。
    /// 已存在时不动。
    pub fn register_room(&self, room_id: RoomId, next_seq: u64) {
        self.rooms.entry(room_id).or_insert_with(|| RoomChannel {
            sender: broadcast::channel(self.capacity).0,
            next_seq: Arc::new(Mutex::new(next_seq)),
        });
    }

    fn channel(&self, room_id: &RoomId) -> dashmap::mapref::one::Ref<'_, RoomId, RoomChannel> {
        if !self.rooms.contains_key(room_id) {
            self.register_room(room_id.clone(), 1);
        }
        self.rooms.get(room_id).expect("room channel just inserted")
    }

    pub fn subscribe(&self, room_id: &RoomId) -> RoomSubscription {
        RoomSubscription {
            receiver: self.channel(room_id).sender.subscribe(),
        }
    }

    /// 锁住房间的序号闸门。同一房间的消息发布全部经过这里串行。
    pub async fn lock_room(&self, room_id: &RoomId) -> SequenceGuard {
        let next_seq = Arc::clone(&self.channel(room_id).next_seq);
        SequenceGuard {
            guard: next_seq.lock_owned().await,
        }
    }

    /// 向房间扇出一条事件，返回当前订阅者数量。
    /// 没有订阅者不算错误，事件直接丢弃。未注册的房间不会被
    /// 重新建出通道：删除房间后的迟到发布是无操作。
    pub fn publish(&self, room_id: &RoomId, event: ServerEvent) -> usize {
        let Some(channel) = self.rooms.get(room_id) else {
            debug!(room_id = %room_id, "room not registered, event dropped");
            return 0;
        };
        match channel.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!(room_id = %room_id, "no subscribers, event dropped");
                0
            }
        }
    }

    /// 当前持有通道的房间数
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn subscriber_count(&self, room_id: &RoomId) -> usize {
        self.rooms
            .get(room_id)
            .map(|c| c.sender.receiver_count())
            .unwrap_or(0)
    }

    /// 移除房间通道，订阅端收到 Closed。
    pub fn remove_room(&self, room_id: &RoomId) {
        self.rooms.remove(room_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::{UserId, UserRef, Username};
    use uuid::Uuid;

    fn room(id: &str) -> RoomId {
        RoomId::parse(id).unwrap()
    }

    fn joined_event(room_id: &RoomId, name: &str) -> ServerEvent {
        ServerEvent::UserJoined {
            room_id: room_id.clone(),
            user: UserRef {
                user_id: UserId::new(Uuid::new_v4()),
                username: Username::parse(name).unwrap(),
            },
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn fan_out_reaches_all_subscribers() {
        let broadcaster = RoomBroadcaster::new(16);
        let general = room("general");

        let mut a = broadcaster.subscribe(&general);
        let mut b = broadcaster.subscribe(&general);

        let receivers = broadcaster.publish(&general, joined_event(&general, "alice"));
        assert_eq!(receivers, 2);

        assert!(matches!(a.recv().await, Ok(ServerEvent::UserJoined { .. })));
        assert!(matches!(b.recv().await, Ok(ServerEvent::UserJoined { .. })));
    }

    #[tokio::test]
    async fn rooms_are_independent_domains() {
        let broadcaster = RoomBroadcaster::new(16);
        let general = room("general");
        let tech = room("tech");

        let mut tech_sub = broadcaster.subscribe(&tech);
        broadcaster.publish(&general, joined_event(&general, "alice"));
        broadcaster.publish(&tech, joined_event(&tech, "bobby"));

        // tech 的订阅者只看到 tech 的事件
        match tech_sub.recv().await.unwrap() {
            ServerEvent::UserJoined { room_id, .. } => assert_eq!(room_id, tech),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn slow_consumer_sees_lag() {
        let broadcaster = RoomBroadcaster::new(2);
        let general = room("general");
        let mut sub = broadcaster.subscribe(&general);

        for _ in 0..5 {
            broadcaster.publish(&general, joined_event(&general, "alice"));
        }

        assert!(matches!(sub.recv().await, Err(SubscriptionError::Lagged(_))));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_dropped() {
        let broadcaster = RoomBroadcaster::new(16);
        let general = room("general");
        assert_eq!(broadcaster.publish(&general, joined_event(&general, "alice")), 0);
    }

    #[tokio::test]
    async fn sequence_guard_is_serial_and_gapless() {
        let broadcaster = Arc::new(RoomBroadcaster::new(16));
        let general = room("general");
        broadcaster.register_room(general.clone(), 1);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let broadcaster = Arc::clone(&broadcaster);
            let general = general.clone();
            handles.push(tokio::spawn(async move {
                let guard = broadcaster.lock_room(&general).await;
                guard.commit()
            }));
        }

        let mut seqs = Vec::new();
        for handle in handles {
            seqs.push(handle.await.unwrap());
        }
        seqs.sort_unstable();
        assert_eq!(seqs, (1..=8).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn aborted_publish_does_not_consume_sequence() {
        let broadcaster = RoomBroadcaster::new(16);
        let general = room("general");
        broadcaster.register_room(general.clone(), 1);

        {
            let guard = broadcaster.lock_room(&general).await;
            assert_eq!(guard.peek(), 1);
            // 持久化失败：直接丢弃凭证
        }

        let guard = broadcaster.lock_room(&general).await;
        assert_eq!(guard.peek(), 1);
        assert_eq!(guard.commit(), 1);

        let guard = broadcaster.lock_room(&general).await;
        assert_eq!(guard.peek(), 2);
    }

    #[tokio::test]
    async fn removed_room_closes_subscriptions() {
        let broadcaster = RoomBroadcaster::new(16);
        let general = room("general");
        let mut sub = broadcaster.subscribe(&general);

        broadcaster.remove_room(&general);
        assert_eq!(sub.recv().await, Err(SubscriptionError::Closed));
    }

    #[tokio::test]
    async fn late_publish_does_not_resurrect_removed_room() {
        let broadcaster = RoomBroadcaster::new(16);
        let general = room("general");
        broadcaster.register_room(general.clone(), 1);
        assert_eq!(broadcaster.room_count(), 1);

        broadcaster.remove_room(&general);
        assert_eq!(broadcaster.publish(&general, joined_event(&general, "alice")), 0);
        assert_eq!(broadcaster.room_count(), 0);
    }
}
