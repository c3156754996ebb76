//! WebSocket 连接管理
//!
//! 每个连接一个接收循环加一个发送任务，发送任务独占 socket 写端，
//! 所有写操作通过有界命令通道排队。房间订阅由独立的转发任务消费，
//! 切换房间时旧任务被替换。出站队列塞满或订阅滞后视为慢消费者：
//! 关闭信号走独立的 Notify 而不是已经拥堵的出站队列，
//! 接收循环观察到信号后立即断开，不阻塞整个房间。

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use application::{
    ApplicationError, RoomSubscription, SendMessageRequest, SubscriptionError,
};
use domain::{
    AttachmentMeta, ClientEvent, ConnectionId, DomainError, ErrorKind, ServerEvent, UserId,
    Username,
};

use crate::state::AppState;

/// WebSocket 写操作命令
#[derive(Debug)]
enum WsCommand {
    Event(ServerEvent),
    Pong(Vec<u8>),
    Close,
}

pub struct WsConnection {
    state: AppState,
    connection_id: ConnectionId,
    user_id: UserId,
    username: Username,
}

impl WsConnection {
    pub fn new(state: AppState, user_id: UserId, username: Username) -> Self {
        Self {
            state,
            connection_id: ConnectionId::generate(),
            user_id,
            username,
        }
    }

    pub async fn run(self, socket: WebSocket) {
        let connection_id = self.connection_id;
        let rooms = match self
            .state
            .chat_service
            .connect(connection_id, self.user_id, self.username.clone())
            .await
        {
            Ok(rooms) => rooms,
            Err(err) => {
                warn!(error = %err, "connection setup failed");
                return;
            }
        };

        let (mut sink, mut incoming) = socket.split();
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(self.state.chat.outbound_queue);

        // 发送任务：独占写端
        let mut send_task: JoinHandle<()> = tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                match cmd {
                    WsCommand::Event(event) => {
                        let payload = match serde_json::to_string(&event) {
                            Ok(json) => json,
                            Err(err) => {
                                warn!(error = %err, "failed to serialize websocket payload");
                                continue;
                            }
                        };
                        if sink.send(WsMessage::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    WsCommand::Pong(data) => {
                        if sink.send(WsMessage::Pong(data.into())).await.is_err() {
                            break;
                        }
                    }
                    WsCommand::Close => {
                        let _ = sink.send(WsMessage::Close(None)).await;
                        break;
                    }
                }
            }
        });

        // 首包：房间列表
        let _ = cmd_tx
            .send(WsCommand::Event(ServerEvent::Rooms { rooms }))
            .await;

        let mut forwarder: Option<JoinHandle<()>> = None;
        // 慢消费者的关闭信号，独立于出站队列
        let close = Arc::new(Notify::new());

        // 接收循环：客户端事件分发
        loop {
            tokio::select! {
                maybe = incoming.next() => {
                    let Some(Ok(message)) = maybe else { break };
                    match message {
                        WsMessage::Close(_) => break,
                        WsMessage::Ping(data) => {
                            if cmd_tx.send(WsCommand::Pong(data.to_vec())).await.is_err() {
                                break;
                            }
                        }
                        WsMessage::Pong(_) | WsMessage::Binary(_) => {}
                        WsMessage::Text(text) => {
                            let event = match serde_json::from_str::<ClientEvent>(&text) {
                                Ok(event) => event,
                                Err(err) => {
                                    debug!(error = %err, "malformed client event");
                                    let _ = cmd_tx
                                        .send(WsCommand::Event(ServerEvent::Error {
                                            kind: ErrorKind::ValidationFailed,
                                            message: format!("malformed event: {}", err),
                                        }))
                                        .await;
                                    continue;
                                }
                            };
                            if self
                                .dispatch(event, &cmd_tx, &close, &mut forwarder)
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                    }
                }
                _ = close.notified() => {
                    info!(connection_id = %connection_id, "slow consumer, closing connection");
                    break;
                }
            }
        }

        // 级联清理：退出房间、清除打字状态、标记离线
        if let Some(task) = forwarder.take() {
            task.abort();
        }
        // 尽力而为的关闭帧；队列拥堵时不排队等候
        let _ = cmd_tx.try_send(WsCommand::Close);
        drop(cmd_tx);
        if tokio::time::timeout(Duration::from_secs(5), &mut send_task)
            .await
            .is_err()
        {
            send_task.abort();
        }

        if let Err(err) = self.state.chat_service.disconnect(connection_id).await {
            warn!(connection_id = %connection_id, error = %err, "disconnect cleanup failed");
        }
        info!(connection_id = %connection_id, user_id = %self.user_id, "websocket closed");
    }

    async fn dispatch(
        &self,
        event: ClientEvent,
        cmd_tx: &mpsc::Sender<WsCommand>,
        close: &Arc<Notify>,
        forwarder: &mut Option<JoinHandle<()>>,
    ) -> Result<(), ()> {
        let connection_id = self.connection_id;
        let service = &self.state.chat_service;

        let outcome: Result<(), ApplicationError> = match event {
            ClientEvent::JoinRoom { room_id } => {
                match service.join_room(connection_id, room_id).await {
                    Ok(joined) => {
                        if let Some(task) = forwarder.take() {
                            task.abort();
                        }
                        if cmd_tx
                            .send(WsCommand::Event(ServerEvent::MessageHistory {
                                messages: joined.history,
                            }))
                            .await
                            .is_err()
                        {
                            return Err(());
                        }
                        *forwarder = Some(spawn_forwarder(
                            joined.subscription,
                            cmd_tx.clone(),
                            Arc::clone(close),
                            connection_id,
                        ));
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            }
            ClientEvent::LeaveRoom { room_id } => {
                if let Some(task) = forwarder.take() {
                    task.abort();
                }
                service.leave_room(connection_id, room_id).await
            }
            ClientEvent::Message {
                room_id,
                content,
                kind,
                metadata,
            } => service
                .send_message(SendMessageRequest {
                    connection_id,
                    room_id,
                    content,
                    kind,
                    metadata: metadata.map(|m| AttachmentMeta {
                        file_url: m.file_url,
                        file_name: m.file_name,
                        file_size: m.file_size,
                        mime_type: m.mime_type,
                    }),
                })
                .await
                .map(|_| ()),
            ClientEvent::Typing { room_id, is_typing } => {
                service.set_typing(connection_id, room_id, is_typing).await
            }
            ClientEvent::Reaction {
                room_id,
                message_id,
                emoji,
            } => service
                .toggle_reaction(connection_id, room_id, message_id, &emoji)
                .await
                .map(|_| ()),
            ClientEvent::EditMessage {
                room_id,
                message_id,
                content,
            } => service
                .edit_message(connection_id, room_id, message_id, &content)
                .await
                .map(|_| ()),
            ClientEvent::MarkRead {
                room_id,
                message_id,
            } => service
                .mark_read(connection_id, room_id, message_id)
                .await
                .map(|_| ()),
        };

        if let Err(err) = outcome {
            if cmd_tx
                .send(WsCommand::Event(error_event(&err)))
                .await
                .is_err()
            {
                return Err(());
            }
        }
        Ok(())
    }
}

/// 订阅转发任务：把房间事件搬进出站队列。
/// 队列塞满或订阅滞后都按慢消费者处理：通过 Notify 请求关闭连接，
/// 信号不经过可能已经塞满的出站队列。
fn spawn_forwarder(
    mut subscription: RoomSubscription,
    cmd_tx: mpsc::Sender<WsCommand>,
    close: Arc<Notify>,
    connection_id: ConnectionId,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match subscription.recv().await {
                Ok(event) => match cmd_tx.try_send(WsCommand::Event(event)) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(connection_id = %connection_id, "outbound queue full, disconnecting slow consumer");
                        close.notify_one();
                        break;
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                },
                Err(SubscriptionError::Lagged(missed)) => {
                    warn!(connection_id = %connection_id, missed, "subscription lagged, disconnecting slow consumer");
                    close.notify_one();
                    break;
                }
                Err(SubscriptionError::Closed) => break,
            }
        }
    })
}

fn error_event(error: &ApplicationError) -> ServerEvent {
    let (kind, message) = match error {
        ApplicationError::Domain(domain_error) => {
            let kind = match domain_error {
                DomainError::NotFound { .. } => ErrorKind::NotFound,
                DomainError::Forbidden { .. } => ErrorKind::Forbidden,
                DomainError::RateLimited { .. } => ErrorKind::RateLimited,
                DomainError::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
                DomainError::ValidationFailed { .. } => ErrorKind::ValidationFailed,
            };
            (kind, domain_error.to_string())
        }
        ApplicationError::Authentication => {
            (ErrorKind::Forbidden, "authentication failed".to_string())
        }
        other => (ErrorKind::UpstreamFailure, other.to_string()),
    };
    ServerEvent::Error { kind, message }
}
