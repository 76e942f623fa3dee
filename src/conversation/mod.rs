//! 对话持久化：实体、存储后端与对话服务

pub mod model;
pub mod service;
pub mod storage;

pub use model::Conversation;
pub use service::{ConversationService, ConversationStore};
pub use storage::{ConversationStorage, JsonFileStorage, MemoryStorage};
