//! 并发场景下的行为验证：限流上限、房间内全序、跨房间隔离。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::task::JoinSet;
use uuid::Uuid;

use application::{
    ChatService, ChatServiceDependencies, ConnectionRegistry, ManualClock, MemoryPresenceStore,
    MessageRepository, NoopFilter, RateLimitAction, RateLimiter, RoomBroadcaster, RoomDirectory,
    RoomHistory, RoomRepository, SendMessageRequest,
};
use config::{ChatConfig, Quota, RateLimitConfig};
use domain::{
    ConnectionId, Message, MessageId, MessageKind, RepositoryError, Room, RoomId, RoomKind,
    ServerEvent, UserId, Username,
};

struct MemoryMessages {
    messages: DashMap<MessageId, Message>,
}

#[async_trait]
impl MessageRepository for MemoryMessages {
    async fn append(&self, message: Message) -> Result<(), RepositoryError> {
        self.messages.insert(message.id, message);
        Ok(())
    }

    async fn update(&self, message: Message) -> Result<(), RepositoryError> {
        self.messages.insert(message.id, message);
        Ok(())
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        Ok(self.messages.get(&id).map(|m| m.clone()))
    }

    async fn recent(
        &self,
        room_id: &RoomId,
        limit: usize,
    ) -> Result<Vec<Message>, RepositoryError> {
        let mut messages: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| &m.room_id == room_id)
            .map(|m| m.clone())
            .collect();
        messages.sort_by_key(|m| m.seq);
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.into_iter().skip(skip).collect())
    }

    async fn count(&self, room_id: &RoomId) -> Result<usize, RepositoryError> {
        Ok(self.messages.iter().filter(|m| &m.room_id == room_id).count())
    }

    async fn prune_before(
        &self,
        room_id: &RoomId,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, RepositoryError> {
        let before = self.messages.len();
        self.messages
            .retain(|_, m| &m.room_id != room_id || m.created_at >= cutoff);
        Ok(before - self.messages.len())
    }
}

struct MemoryRooms {
    rooms: DashMap<RoomId, Room>,
}

#[async_trait]
impl RoomRepository for MemoryRooms {
    async fn upsert(&self, room: Room) -> Result<Room, RepositoryError> {
        self.rooms.insert(room.id.clone(), room.clone());
        Ok(room)
    }

    async fn find_by_id(&self, id: &RoomId) -> Result<Option<Room>, RepositoryError> {
        Ok(self.rooms.get(id).map(|r| r.clone()))
    }

    async fn list(&self) -> Result<Vec<Room>, RepositoryError> {
        Ok(self.rooms.iter().map(|r| r.clone()).collect())
    }

    async fn delete(&self, id: &RoomId) -> Result<(), RepositoryError> {
        self.rooms.remove(id);
        Ok(())
    }
}

fn room(id: &str) -> RoomId {
    RoomId::parse(id).unwrap()
}

fn service() -> (Arc<ChatService>, Arc<RoomBroadcaster>) {
    let directory = Arc::new(RoomDirectory::new());
    for id in ["general", "tech"] {
        directory.insert_room(
            Room::new(room(id), id, "", RoomKind::Public, 1000, Utc::now()).unwrap(),
        );
    }

    let broadcaster = Arc::new(RoomBroadcaster::new(4096));
    // 放开限流，专注排序语义
    let unlimited = Quota {
        points: 1_000_000,
        window_secs: 60,
    };
    let service = ChatService::new(ChatServiceDependencies {
        registry: Arc::new(ConnectionRegistry::new()),
        directory,
        presence: Arc::new(MemoryPresenceStore::new(5)),
        rate_limiter: Arc::new(RateLimiter::new(RateLimitConfig {
            api: unlimited,
            auth: unlimited,
            message: unlimited,
            room_join: unlimited,
        })),
        broadcaster: Arc::clone(&broadcaster),
        history: Arc::new(RoomHistory::new(1000)),
        messages: Arc::new(MemoryMessages {
            messages: DashMap::new(),
        }),
        rooms: Arc::new(MemoryRooms {
            rooms: DashMap::new(),
        }),
        filter: Arc::new(NoopFilter),
        clock: Arc::new(ManualClock::default()),
        chat: ChatConfig::default(),
    });
    (Arc::new(service), broadcaster)
}

async fn join(service: &ChatService, name: &str, room_id: &str) -> ConnectionId {
    let connection_id = ConnectionId::generate();
    service
        .connect(
            connection_id,
            UserId::new(Uuid::new_v4()),
            Username::parse(name).unwrap(),
        )
        .await
        .unwrap();
    service.join_room(connection_id, room(room_id)).await.unwrap();
    connection_id
}

#[tokio::test]
async fn parallel_consumers_never_exceed_quota() {
    let quota = Quota {
        points: 50,
        window_secs: 60,
    };
    let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
        api: quota,
        auth: quota,
        message: quota,
        room_join: quota,
    }));
    let now = Utc::now();

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let limiter = Arc::clone(&limiter);
        tasks.spawn(async move {
            let mut granted = 0u32;
            for _ in 0..20 {
                if limiter.consume("alice", RateLimitAction::Message, now).is_ok() {
                    granted += 1;
                }
            }
            granted
        });
    }

    let mut total = 0;
    while let Some(granted) = tasks.join_next().await {
        total += granted.unwrap();
    }
    // 160次并发尝试，放行数恰好等于额度
    assert_eq!(total, 50);
}

#[tokio::test]
async fn observers_see_one_total_order_per_room() {
    let (service, _broadcaster) = service();

    let observer = join(&service, "carol", "general").await;
    let mut subscription = service
        .join_room(observer, room("general"))
        .await
        .unwrap()
        .subscription;

    let alice = join(&service, "alice", "general").await;
    let bobby = join(&service, "bobby", "general").await;

    let mut tasks = JoinSet::new();
    for (conn, who) in [(alice, "alice"), (bobby, "bobby")] {
        let service = Arc::clone(&service);
        tasks.spawn(async move {
            for i in 0..25 {
                service
                    .send_message(SendMessageRequest {
                        connection_id: conn,
                        room_id: room("general"),
                        content: format!("{} {}", who, i),
                        kind: MessageKind::Text,
                        metadata: None,
                    })
                    .await
                    .unwrap();
            }
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap();
    }

    // 观察者看到的消息序号严格递增且无空洞
    let mut seqs = Vec::new();
    while seqs.len() < 50 {
        match subscription.recv().await.unwrap() {
            ServerEvent::Message { message } => seqs.push(message.seq),
            _ => continue,
        }
    }
    assert_eq!(seqs, (1..=50).collect::<Vec<u64>>());
}

#[tokio::test]
async fn rooms_do_not_interleave() {
    let (service, _broadcaster) = service();

    let tech_observer = join(&service, "carol", "tech").await;
    let mut tech_sub = service
        .join_room(tech_observer, room("tech"))
        .await
        .unwrap()
        .subscription;

    let alice = join(&service, "alice", "general").await;
    let bobby = join(&service, "bobby", "tech").await;

    for i in 0..5 {
        service
            .send_message(SendMessageRequest {
                connection_id: alice,
                room_id: room("general"),
                content: format!("general {}", i),
                kind: MessageKind::Text,
                metadata: None,
            })
            .await
            .unwrap();
        service
            .send_message(SendMessageRequest {
                connection_id: bobby,
                room_id: room("tech"),
                content: format!("tech {}", i),
                kind: MessageKind::Text,
                metadata: None,
            })
            .await
            .unwrap();
    }

    // tech 的订阅只收到 tech 的消息，序号是 tech 自己的 1..=5
    let mut seqs = Vec::new();
    while seqs.len() < 5 {
        match tech_sub.recv().await.unwrap() {
            ServerEvent::Message { message } => {
                assert_eq!(message.room_id, room("tech"));
                seqs.push(message.seq);
            }
            _ => continue,
        }
    }
    assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
}
