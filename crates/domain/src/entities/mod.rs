//! 核心实体模块

pub mod message;
pub mod room;
pub mod user;

pub use message::*;
pub use room::*;
pub use user::*;
