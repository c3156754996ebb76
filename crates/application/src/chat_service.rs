//! 消息管道与房间编排
//!
//! 连接生命周期、加入/退出、发送、打字指示、回应和编辑都从这里走。
//! 发送管道的检查顺序固定：身份 -> 占用 -> 禁言/慢速 -> 限流 ->
//! 附件 -> 过滤 -> 长度，任何一步失败都在持久化之前中止，
//! 不留下部分状态。取号、持久化、广播在房间序号闸门内完成，
//! 同一房间的消息对所有订阅者呈现同一顺序。

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use config::ChatConfig;
use dashmap::DashMap;
use domain::{
    AttachmentMeta, ConnectionId, DeliveryStatus, DomainError, Message, MessageId, MessageKind,
    RepositoryError, Room, RoomId, RoomSummary, SenderSnapshot, ServerEvent, UserId, UserRef,
    Username,
};
use tracing::{debug, info, instrument, warn};

use crate::clock::Clock;
use crate::dispatcher::{RoomBroadcaster, RoomSubscription};
use crate::error::ApplicationError;
use crate::filter::ContentFilter;
use crate::history::RoomHistory;
use crate::presence::{PresenceStatus, PresenceStore};
use crate::rate_limiter::{RateLimitAction, RateLimiter};
use crate::registry::{ConnectionRecord, ConnectionRegistry};
use crate::repository::{MessageRepository, RoomRepository};
use crate::room_directory::{JoinOutcome, RoomDirectory};

/// 发送消息请求
#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub connection_id: ConnectionId,
    pub room_id: RoomId,
    pub content: String,
    pub kind: MessageKind,
    pub metadata: Option<AttachmentMeta>,
}

/// 加入房间的结果：历史回放 + 房间订阅
pub struct JoinedRoom {
    pub outcome: JoinOutcome,
    pub history: Vec<Message>,
    pub subscription: RoomSubscription,
}

/// 聊天服务的协作者集合
pub struct ChatServiceDependencies {
    pub registry: Arc<ConnectionRegistry>,
    pub directory: Arc<RoomDirectory>,
    pub presence: Arc<dyn PresenceStore>,
    pub rate_limiter: Arc<RateLimiter>,
    pub broadcaster: Arc<RoomBroadcaster>,
    pub history: Arc<RoomHistory>,
    pub messages: Arc<dyn MessageRepository>,
    pub rooms: Arc<dyn RoomRepository>,
    pub filter: Arc<dyn ContentFilter>,
    pub clock: Arc<dyn Clock>,
    pub chat: ChatConfig,
}

pub struct ChatService {
    deps: ChatServiceDependencies,
    /// (房间, 用户) -> 上次发言时刻，慢速模式用
    last_sent: DashMap<(RoomId, UserId), DateTime<Utc>>,
}

impl ChatService {
    pub fn new(deps: ChatServiceDependencies) -> Self {
        Self {
            deps,
            last_sent: DashMap::new(),
        }
    }

    fn resolve(&self, connection_id: ConnectionId) -> Result<ConnectionRecord, ApplicationError> {
        self.deps
            .registry
            .lookup(connection_id)
            .ok_or_else(|| DomainError::not_found("connection", connection_id.to_string()).into())
    }

    fn user_ref(&self, record: &ConnectionRecord) -> UserRef {
        UserRef {
            user_id: record.user_id,
            username: record.display_name.clone(),
        }
    }

    /// 握手成功后登记连接，返回房间列表供首包下发。
    pub async fn connect(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        display_name: Username,
    ) -> Result<Vec<RoomSummary>, ApplicationError> {
        let now = self.deps.clock.now();
        self.deps
            .registry
            .register(connection_id, user_id, display_name, now);
        self.deps
            .presence
            .set_presence(user_id, PresenceStatus::Online, now)
            .await?;

        info!(connection_id = %connection_id, user_id = %user_id, "connection established");
        Ok(self.deps.directory.summaries())
    }

    /// 断开连接的级联清理：退出当前房间、清除打字状态、标记离线。
    /// 幂等，重复断开是无操作。
    #[instrument(skip(self))]
    pub async fn disconnect(&self, connection_id: ConnectionId) -> Result<(), ApplicationError> {
        let Some(record) = self.deps.registry.unregister(connection_id) else {
            return Ok(());
        };

        if let Some(room_id) = record.current_room.clone() {
            self.depart_room(&record, &room_id).await?;
        }

        let now = self.deps.clock.now();
        // 同一用户还有别的连接在线时不降级为离线
        if self.deps.registry.display_name(record.user_id).is_none() {
            self.deps
                .presence
                .set_presence(record.user_id, PresenceStatus::Offline, now)
                .await?;
        }

        info!(connection_id = %connection_id, user_id = %record.user_id, "connection closed");
        Ok(())
    }

    /// 加入房间。一个连接同一时刻只占用一个房间：
    /// 加入新房间会先退出旧房间。
    #[instrument(skip(self))]
    pub async fn join_room(
        &self,
        connection_id: ConnectionId,
        room_id: RoomId,
    ) -> Result<JoinedRoom, ApplicationError> {
        let record = self.resolve(connection_id)?;
        let now = self.deps.clock.now();

        self.deps
            .rate_limiter
            .consume(record.user_id.to_string(), RateLimitAction::RoomJoin, now)?;

        let outcome = self.deps.directory.join(&room_id, record.user_id, now)?;

        if let Some(Some(previous)) = self
            .deps
            .registry
            .set_current_room(connection_id, Some(room_id.clone()))
        {
            if previous != room_id {
                self.depart_room(&record, &previous).await?;
            }
        }

        if outcome == JoinOutcome::Joined {
            self.deps.broadcaster.publish(
                &room_id,
                ServerEvent::UserJoined {
                    room_id: room_id.clone(),
                    user: self.user_ref(&record),
                    timestamp: now,
                },
            );
            debug!(room_id = %room_id, user_id = %record.user_id, "user joined room");
        }

        let history = self
            .deps
            .history
            .recent(&room_id, self.deps.chat.history_replay);
        let subscription = self.deps.broadcaster.subscribe(&room_id);

        Ok(JoinedRoom {
            outcome,
            history,
            subscription,
        })
    }

    /// 显式退出房间，幂等。
    #[instrument(skip(self))]
    pub async fn leave_room(
        &self,
        connection_id: ConnectionId,
        room_id: RoomId,
    ) -> Result<(), ApplicationError> {
        let record = self.resolve(connection_id)?;

        if record.current_room.as_ref() == Some(&room_id) {
            self.deps.registry.set_current_room(connection_id, None);
        }
        self.depart_room(&record, &room_id).await
    }

    /// 共用的退出路径：占用移除、打字清理、离开广播。
    async fn depart_room(
        &self,
        record: &ConnectionRecord,
        room_id: &RoomId,
    ) -> Result<(), ApplicationError> {
        self.deps.directory.leave(room_id, record.user_id);
        self.deps
            .presence
            .clear_typing(room_id, record.user_id)
            .await?;

        let now = self.deps.clock.now();
        self.deps.broadcaster.publish(
            room_id,
            ServerEvent::UserLeft {
                room_id: room_id.clone(),
                user: self.user_ref(record),
                timestamp: now,
            },
        );
        self.broadcast_typing(room_id, now).await?;
        Ok(())
    }

    /// 发送消息管道。所有检查在持久化之前完成；被拒绝的请求
    /// 不消耗序号、不写历史、不触发广播。
    #[instrument(skip(self, request), fields(room_id = %request.room_id))]
    pub async fn send_message(
        &self,
        request: SendMessageRequest,
    ) -> Result<Message, ApplicationError> {
        let record = self.resolve(request.connection_id)?;
        let now = self.deps.clock.now();
        let room_id = request.room_id.clone();

        if !self.deps.directory.is_occupant(&room_id, record.user_id) {
            return Err(DomainError::forbidden("发送消息前必须先加入房间").into());
        }

        let room = self.deps.directory.get_room(&room_id)?;
        if room.is_muted(record.user_id, now) {
            return Err(DomainError::forbidden("您在该房间已被禁言").into());
        }

        // 慢速模式按 (房间, 用户) 计时，版主豁免
        let slow_mode = room.settings.slow_mode_secs;
        if slow_mode > 0 && !room.is_moderator(record.user_id) {
            let key = (room_id.clone(), record.user_id);
            if let Some(last) = self.last_sent.get(&key) {
                let remaining = slow_mode as i64 - (now - *last).num_seconds();
                if remaining > 0 {
                    return Err(DomainError::rate_limited(remaining as u64).into());
                }
            }
        }

        self.deps
            .rate_limiter
            .consume(record.user_id.to_string(), RateLimitAction::Message, now)?;

        if let Some(meta) = &request.metadata {
            room.validate_attachment(&meta.mime_type, meta.file_size)?;
        }

        let content = self.deps.filter.clean(&request.content);

        // 房间序号闸门：取号、持久化、广播串行执行
        let guard = self.deps.broadcaster.lock_room(&room_id).await;
        let mut message = Message::new(
            guard.peek(),
            room_id.clone(),
            SenderSnapshot {
                user_id: record.user_id,
                display_name: record.display_name.clone(),
            },
            content,
            request.kind,
            request.metadata,
            now,
        )?;
        // 除发送者外还有订阅者时，消息一经广播即视为已送达
        if self.deps.broadcaster.subscriber_count(&room_id) > 1 {
            message.status = DeliveryStatus::Delivered;
        }

        if let Err(e) = self.deps.messages.append(message.clone()).await {
            warn!(room_id = %room_id, error = %e, "message persistence failed, aborting send");
            return Err(e.into());
        }

        self.deps.history.push(message.clone());
        self.deps.broadcaster.publish(
            &room_id,
            ServerEvent::Message {
                message: message.clone(),
            },
        );
        guard.commit();

        self.last_sent.insert((room_id, record.user_id), now);
        // 发言视为停止打字
        self.deps
            .presence
            .clear_typing(&message.room_id, record.user_id)
            .await?;
        self.broadcast_typing(&message.room_id, now).await?;

        Ok(message)
    }

    /// 更新打字状态并广播全量打字集合。
    pub async fn set_typing(
        &self,
        connection_id: ConnectionId,
        room_id: RoomId,
        is_typing: bool,
    ) -> Result<(), ApplicationError> {
        let record = self.resolve(connection_id)?;
        if !self.deps.directory.is_occupant(&room_id, record.user_id) {
            return Err(DomainError::forbidden("您不在该房间内").into());
        }

        let now = self.deps.clock.now();
        self.deps
            .presence
            .set_typing(&room_id, record.user_id, is_typing, now)
            .await?;
        self.broadcast_typing(&room_id, now).await
    }

    async fn broadcast_typing(
        &self,
        room_id: &RoomId,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        let typing = self.deps.presence.typing_users(room_id, now).await?;
        let mut usernames: Vec<Username> = typing
            .into_iter()
            .filter_map(|user_id| self.deps.registry.display_name(user_id))
            .collect();
        usernames.sort_by(|a, b| a.as_str().cmp(b.as_str()));

        self.deps.broadcaster.publish(
            room_id,
            ServerEvent::TypingUsers {
                room_id: room_id.clone(),
                usernames,
            },
        );
        Ok(())
    }

    /// 切换表情回应，广播更新后的完整消息。
    pub async fn toggle_reaction(
        &self,
        connection_id: ConnectionId,
        room_id: RoomId,
        message_id: MessageId,
        emoji: &str,
    ) -> Result<Message, ApplicationError> {
        let record = self.resolve(connection_id)?;
        if !self.deps.directory.is_occupant(&room_id, record.user_id) {
            return Err(DomainError::forbidden("您不在该房间内").into());
        }

        let now = self.deps.clock.now();
        self.update_message(&room_id, message_id, |message| {
            message.toggle_reaction(record.user_id, emoji, now);
            Ok(())
        })
        .await
    }

    /// 编辑消息，只有发送者本人可以编辑。
    pub async fn edit_message(
        &self,
        connection_id: ConnectionId,
        room_id: RoomId,
        message_id: MessageId,
        new_content: &str,
    ) -> Result<Message, ApplicationError> {
        let record = self.resolve(connection_id)?;
        if !self.deps.directory.is_occupant(&room_id, record.user_id) {
            return Err(DomainError::forbidden("您不在该房间内").into());
        }
        let now = self.deps.clock.now();

        let content = self.deps.filter.clean(new_content);
        self.update_message(&room_id, message_id, |message| {
            if message.sender.user_id != record.user_id {
                return Err(DomainError::forbidden("只能编辑自己的消息").into());
            }
            message.edit(content, now)?;
            Ok(())
        })
        .await
    }

    /// 记录已读回执，幂等。
    pub async fn mark_read(
        &self,
        connection_id: ConnectionId,
        room_id: RoomId,
        message_id: MessageId,
    ) -> Result<Message, ApplicationError> {
        let record = self.resolve(connection_id)?;
        if !self.deps.directory.is_occupant(&room_id, record.user_id) {
            return Err(DomainError::forbidden("您不在该房间内").into());
        }
        let now = self.deps.clock.now();

        self.update_message(&room_id, message_id, |message| {
            message.mark_read(record.user_id, now);
            Ok(())
        })
        .await
    }

    async fn load_room_message(
        &self,
        room_id: &RoomId,
        message_id: MessageId,
    ) -> Result<Message, ApplicationError> {
        let message = self
            .deps
            .messages
            .find_by_id(message_id)
            .await?
            .ok_or_else(|| DomainError::not_found("message", message_id.to_string()))?;
        if &message.room_id != room_id {
            return Err(DomainError::not_found("message", message_id.to_string()).into());
        }
        Ok(message)
    }

    /// 房间闸门内的读-改-写。回应/编辑/回执都走这里：
    /// 并发修改同一条消息时后来者读到前者的结果，不会互相覆盖。
    async fn update_message<F>(
        &self,
        room_id: &RoomId,
        message_id: MessageId,
        mutate: F,
    ) -> Result<Message, ApplicationError>
    where
        F: FnOnce(&mut Message) -> Result<(), ApplicationError>,
    {
        let _gate = self.deps.broadcaster.lock_room(room_id).await;
        let mut message = self.load_room_message(room_id, message_id).await?;
        mutate(&mut message)?;

        self.deps.messages.update(message.clone()).await?;
        self.deps.history.replace(&message);
        self.deps.broadcaster.publish(
            room_id,
            ServerEvent::MessageUpdated {
                message: message.clone(),
            },
        );
        Ok(message)
    }

    /// 当前房间列表摘要
    pub fn rooms(&self) -> Vec<RoomSummary> {
        self.deps.directory.summaries()
    }

    /// 管理员建房：落库、登记目录、开广播通道。
    pub async fn create_room(&self, room: Room) -> Result<RoomSummary, ApplicationError> {
        if self.deps.directory.get_room(&room.id).is_ok() {
            return Err(RepositoryError::Conflict.into());
        }

        let room = self.deps.rooms.upsert(room).await?;
        let summary = RoomSummary {
            id: room.id.clone(),
            name: room.name.clone(),
            description: room.description.clone(),
            kind: room.kind,
            capacity: room.capacity,
            occupants: 0,
        };
        self.deps.directory.insert_room(room);
        self.deps.broadcaster.register_room(summary.id.clone(), 1);

        info!(room_id = %summary.id, "room created");
        Ok(summary)
    }

    /// 管理员删房。占用者的订阅通道关闭后由连接层自行收尾。
    pub async fn delete_room(&self, room_id: &RoomId) -> Result<(), ApplicationError> {
        let occupants = self
            .deps
            .directory
            .remove_room(room_id)
            .ok_or_else(|| DomainError::not_found("room", room_id.to_string()))?;

        self.deps.broadcaster.remove_room(room_id);
        self.deps.history.remove_room(room_id);
        self.last_sent.retain(|(r, _), _| r != room_id);
        self.deps.rooms.delete(room_id).await?;

        info!(room_id = %room_id, occupants = occupants.len(), "room deleted");
        Ok(())
    }

    /// 按各房间的保留天数清理持久化消息，返回删除总数。
    /// 保留天数为 0 表示永久保留。回放缓冲自身有容量上限，不在此清理。
    pub async fn prune_expired_messages(&self) -> Result<usize, ApplicationError> {
        let now = self.deps.clock.now();
        let mut removed = 0;
        for room in self.deps.rooms.list().await? {
            let days = room.settings.retention_days;
            if days == 0 {
                continue;
            }
            let cutoff = now - Duration::days(days as i64);
            removed += self.deps.messages.prune_before(&room.id, cutoff).await?;
        }
        if removed > 0 {
            info!(removed, "expired messages pruned");
        }
        Ok(removed)
    }
}
