//! 实时协议事件定义
//!
//! 入站事件用带标签的枚举表示，每个连接任务通过一个类型化的
//! 分发器处理，而不是按键注册回调表。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::{Message, MessageKind, RoomKind};
use crate::value_objects::{MessageId, RoomId, UserId, Username};

/// 客户端 -> 服务端事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinRoom {
        room_id: RoomId,
    },
    LeaveRoom {
        room_id: RoomId,
    },
    Message {
        room_id: RoomId,
        content: String,
        #[serde(default = "default_kind")]
        kind: MessageKind,
        #[serde(default)]
        metadata: Option<AttachmentUpload>,
    },
    Typing {
        room_id: RoomId,
        is_typing: bool,
    },
    Reaction {
        room_id: RoomId,
        message_id: MessageId,
        emoji: String,
    },
    EditMessage {
        room_id: RoomId,
        message_id: MessageId,
        content: String,
    },
    MarkRead {
        room_id: RoomId,
        message_id: MessageId,
    },
}

fn default_kind() -> MessageKind {
    MessageKind::Text
}

/// 客户端随消息附带的附件引用（已经通过上传接口拿到 URL）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentUpload {
    pub file_url: String,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
}

/// 房间摘要（`rooms` 事件的条目）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub id: RoomId,
    pub name: String,
    pub description: String,
    pub kind: RoomKind,
    pub capacity: u32,
    pub occupants: u32,
}

/// 事件里携带的用户信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRef {
    pub user_id: UserId,
    pub username: Username,
}

/// 服务端 -> 客户端事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// 可用房间列表（连接建立时下发）
    Rooms { rooms: Vec<RoomSummary> },
    /// 加入房间时下发的最近历史
    MessageHistory { messages: Vec<Message> },
    /// 房间内广播的完整消息记录
    Message { message: Message },
    /// 消息被修改（编辑、回应、回执）后的完整记录
    MessageUpdated { message: Message },
    UserJoined {
        room_id: RoomId,
        user: UserRef,
        timestamp: DateTime<Utc>,
    },
    UserLeft {
        room_id: RoomId,
        user: UserRef,
        timestamp: DateTime<Utc>,
    },
    /// 打字中的用户全量集合（非增量），客户端据此自我纠正
    TypingUsers {
        room_id: RoomId,
        usernames: Vec<Username>,
    },
    Error { kind: ErrorKind, message: String },
}

/// 错误事件分类，与领域错误一一对应
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    RateLimited,
    CapacityExceeded,
    ValidationFailed,
    UpstreamFailure,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_event_wire_format() {
        let json = r#"{"type":"join_room","room_id":"general"}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            ClientEvent::JoinRoom {
                room_id: RoomId::parse("general").unwrap()
            }
        );
    }

    #[test]
    fn message_event_defaults_to_text() {
        let json = r#"{"type":"message","room_id":"general","content":"hi"}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        match event {
            ClientEvent::Message { kind, metadata, .. } => {
                assert_eq!(kind, MessageKind::Text);
                assert!(metadata.is_none());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn server_event_tags() {
        let event = ServerEvent::TypingUsers {
            room_id: RoomId::parse("general").unwrap(),
            usernames: vec![Username::parse("alice").unwrap()],
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"typing_users""#));
        assert!(json.contains("alice"));
    }

    #[test]
    fn malformed_event_rejected() {
        let json = r#"{"type":"unknown_event"}"#;
        assert!(serde_json::from_str::<ClientEvent>(json).is_err());
    }
}
