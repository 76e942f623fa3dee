//! Agent 传输层
//!
//! 传输层负责启动一轮对话，并在轮次进行期间通过 [`EventSink`] 按顺序投递生命周期事件：
//! 至多一个 `thinking_started`（总在第一个 chunk 之前），零或多个 `content_chunk`，
//! 恰好一个终止事件（`completed` 或 `errored`）。

pub mod claude_cli;
pub mod scripted;
pub mod stream_json;

use async_trait::async_trait;

use crate::core::Result;
use crate::transcript::EventSink;

pub use claude_cli::ClaudeCliTransport;
pub use scripted::ScriptedTransport;

/// 轮次传输接口
#[async_trait]
pub trait TurnTransport: Send + Sync {
    /// 发送用户消息并运行一整轮；返回即表示本轮结束。
    ///
    /// 在任何事件送达之前失败时直接返回 Err（不投递事件）。
    async fn send_with_events(&self, conversation_id: &str, content: &str, sink: EventSink) -> Result<()>;
}
