//! 对话记录同步核心
//!
//! 把 Agent 的流式事件增量合并进有序的对话记录：思考占位、分块缓冲与按帧刷新、轮次结束清理。

pub mod controller;
pub mod events;
pub mod flush;
pub mod message;
pub mod reducer;
pub mod store;

pub use controller::{SendOutcome, TurnController};
pub use events::{EventSink, TurnEvent};
pub use flush::{Clock, FlushScheduler, ManualClock, SystemClock, DEFAULT_FLUSH_INTERVAL};
pub use message::{Message, MessageId, Role};
pub use reducer::{StreamTarget, TurnPhase, TurnReducer, TurnState, TurnTexts};
pub use store::{Transcript, TranscriptView};
