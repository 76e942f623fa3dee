//! 轮次生命周期事件：Agent 传输层按到达顺序投递给归约器

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// 单轮对话中的事件（可序列化为 JSON 供前端或日志使用）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Agent 开始思考（每轮至多一次，且在第一个 chunk 之前）
    ThinkingStarted,
    /// 一段增量回复
    ContentChunk { text: String },
    /// 本轮结束；has_content 表示是否收到过非空白内容
    Completed { has_content: bool },
    /// Agent 报告的错误
    Errored { message: String },
}

impl TurnEvent {
    pub fn chunk(text: impl Into<String>) -> Self {
        Self::ContentChunk { text: text.into() }
    }

    pub fn errored(message: impl Into<String>) -> Self {
        Self::Errored {
            message: message.into(),
        }
    }
}

/// 传输层向控制器投递事件的发送端；接收端已关闭时静默丢弃
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<TurnEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TurnEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: TurnEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("turn event dropped, receiver closed");
        }
    }

    pub fn thinking_started(&self) {
        self.emit(TurnEvent::ThinkingStarted);
    }

    pub fn content_chunk(&self, text: impl Into<String>) {
        self.emit(TurnEvent::chunk(text));
    }

    pub fn completed(&self, has_content: bool) {
        self.emit(TurnEvent::Completed { has_content });
    }

    pub fn errored(&self, message: impl Into<String>) {
        self.emit(TurnEvent::errored(message));
    }
}
