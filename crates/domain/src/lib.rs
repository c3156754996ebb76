//! 聊天系统核心领域模型
//!
//! 包含用户、房间、消息等核心实体，以及协议事件和领域错误定义。

pub mod entities;
pub mod errors;
pub mod events;
pub mod value_objects;

// 重新导出常用类型
pub use entities::*;
pub use errors::*;
pub use events::*;
pub use value_objects::*;
