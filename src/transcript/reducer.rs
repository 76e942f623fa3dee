//! 轮次归约器
//!
//! 持有单个进行中轮次的状态（思考占位、流式目标、刷新缓冲），把生命周期事件归约到对话记录上：
//!
//! ```text
//! Idle --thinking_started--> Thinking --content_chunk--> Streaming
//!   \______________________content_chunk_______________/    |
//!  completed / errored（任意状态）-------------------------> Idle
//! ```
//!
//! chunk 本身从不直接写记录内容，只确定写到哪条消息，文本交给 [`FlushScheduler`]。

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::events::TurnEvent;
use super::flush::{Clock, FlushScheduler, SystemClock, DEFAULT_FLUSH_INTERVAL};
use super::message::{Message, MessageId, Role};
use super::store::Transcript;

/// 轮次子状态机的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Thinking,
    Streaming,
}

/// 第一个有效 chunk 到达时，流式目标的决策
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTarget {
    /// 追加一条新的 assistant 消息
    NewMessage,
    /// 继续写入本轮已打开的 assistant 消息
    ContinueExisting(MessageId),
}

/// 归约器插入的固定文案
#[derive(Debug, Clone)]
pub struct TurnTexts {
    pub thinking: String,
    pub no_response: String,
    pub error_prefix: String,
    /// errored 事件没有附带信息时使用
    pub unknown_error: String,
}

impl Default for TurnTexts {
    fn default() -> Self {
        Self {
            thinking: "思考中".to_string(),
            no_response: "抱歉，没有收到任何响应。请检查 Claude CLI 是否正确配置。".to_string(),
            error_prefix: "发生错误: ".to_string(),
            unknown_error: "未知错误".to_string(),
        }
    }
}

/// 单轮瞬时状态（不持久化），轮次结束时整体复位
#[derive(Debug)]
pub struct TurnState {
    pub active: bool,
    pub phase: TurnPhase,
    pub thinking_id: Option<MessageId>,
    pub streaming_id: Option<MessageId>,
    pub scheduler: FlushScheduler,
}

impl TurnState {
    fn new(clock: Arc<dyn Clock>, flush_interval: Duration) -> Self {
        Self {
            active: false,
            phase: TurnPhase::Idle,
            thinking_id: None,
            streaming_id: None,
            scheduler: FlushScheduler::new(clock, flush_interval),
        }
    }
}

/// 轮次归约器
#[derive(Debug)]
pub struct TurnReducer {
    state: TurnState,
    texts: TurnTexts,
}

impl TurnReducer {
    pub fn new(texts: TurnTexts, clock: Arc<dyn Clock>, flush_interval: Duration) -> Self {
        Self {
            state: TurnState::new(clock, flush_interval),
            texts,
        }
    }

    pub fn apply(&mut self, transcript: &mut Transcript, event: TurnEvent) {
        match event {
            TurnEvent::ThinkingStarted => self.thinking_started(transcript),
            TurnEvent::ContentChunk { text } => self.content_chunk(transcript, &text),
            TurnEvent::Completed { has_content } => self.completed(transcript, has_content),
            TurnEvent::Errored { message } => self.errored(transcript, &message),
        }
    }

    /// 插入思考占位（仅 Idle 时）
    pub fn thinking_started(&mut self, transcript: &mut Transcript) {
        if self.state.phase != TurnPhase::Idle || self.state.thinking_id.is_some() {
            tracing::warn!(phase = ?self.state.phase, "thinking_started outside idle phase, ignored");
            return;
        }
        let placeholder = Message::new(MessageId::thinking(), Role::Assistant, self.texts.thinking.clone());
        self.state.thinking_id = Some(placeholder.id.clone());
        transcript.insert_placeholder(placeholder);
        self.state.phase = TurnPhase::Thinking;
        tracing::debug!("thinking placeholder inserted");
    }

    /// 处理一段增量文本；去掉首尾空白后为空的 chunk 整体忽略
    pub fn content_chunk(&mut self, transcript: &mut Transcript, text: &str) {
        if text.trim().is_empty() {
            return;
        }

        self.remove_placeholder(transcript);

        if self.state.streaming_id.is_none() {
            let id = match self.decide_target(transcript) {
                StreamTarget::ContinueExisting(id) => {
                    tracing::debug!(target_id = %id, "continuing open assistant message");
                    id
                }
                StreamTarget::NewMessage => {
                    let msg = Message::assistant("");
                    let id = msg.id.clone();
                    transcript.append(msg);
                    id
                }
            };
            self.state.streaming_id = Some(id);
        }

        tracing::debug!(chunk_len = text.len(), "buffering chunk");
        self.state.scheduler.buffer(text);
        self.state.phase = TurnPhase::Streaming;
    }

    /// 本轮完成：强制刷新；没有内容且占位仍在时替换为“无响应”提示
    pub fn completed(&mut self, transcript: &mut Transcript, has_content: bool) {
        self.flush(transcript);
        if self.state.thinking_id.is_some() {
            self.remove_placeholder(transcript);
            if !has_content {
                transcript.append(Message::new(MessageId::error(), Role::Assistant, self.texts.no_response.clone()));
            }
        }
        self.close_stream(transcript);
        self.state.phase = TurnPhase::Idle;
    }

    /// Agent 报告错误：移除占位并追加一条包含错误文本的 assistant 消息
    pub fn errored(&mut self, transcript: &mut Transcript, message: &str) {
        self.flush(transcript);
        self.remove_placeholder(transcript);
        let detail = if message.trim().is_empty() {
            self.texts.unknown_error.as_str()
        } else {
            message
        };
        tracing::warn!(error = %detail, "agent reported error");
        transcript.append(Message::new(
            MessageId::error(),
            Role::Assistant,
            format!("{}{}", self.texts.error_prefix, detail),
        ));
        self.close_stream(transcript);
        self.state.phase = TurnPhase::Idle;
    }

    /// 立即把缓冲写入流式消息
    pub fn flush(&mut self, transcript: &mut Transcript) -> usize {
        let target = self.state.streaming_id.as_ref();
        self.state.scheduler.flush(transcript, target)
    }

    /// 定时器到点回调
    pub fn on_timer(&mut self, transcript: &mut Transcript) -> bool {
        let target = self.state.streaming_id.as_ref();
        self.state.scheduler.fire_if_due(transcript, target)
    }

    pub fn begin_turn(&mut self) {
        self.state.active = true;
    }

    /// 轮次结束的统一清理：强制刷新、撤掉残留占位、定稿记录并复位全部轮次状态
    pub fn end_turn(&mut self, transcript: &mut Transcript) {
        self.flush(transcript);
        if self.state.thinking_id.is_some() {
            tracing::warn!("turn ended with thinking placeholder still present");
            self.remove_placeholder(transcript);
        }
        transcript.seal();
        self.reset();
    }

    /// 丢弃轮次状态（不写记录）
    pub fn reset(&mut self) {
        self.state.active = false;
        self.state.phase = TurnPhase::Idle;
        self.state.thinking_id = None;
        self.state.streaming_id = None;
        self.state.scheduler.reset();
    }

    fn decide_target(&self, transcript: &Transcript) -> StreamTarget {
        match transcript.last() {
            Some(last) if last.is_assistant() && !last.id.is_thinking() && transcript.is_open(&last.id) => {
                StreamTarget::ContinueExisting(last.id)
            }
            _ => StreamTarget::NewMessage,
        }
    }

    /// 本轮输出定稿：下一轮的 chunk 不会再续写进来
    fn close_stream(&mut self, transcript: &mut Transcript) {
        self.state.streaming_id = None;
        transcript.seal();
    }

    fn remove_placeholder(&mut self, transcript: &mut Transcript) {
        if let Some(id) = self.state.thinking_id.take() {
            transcript.remove_by_id(&id);
        }
    }

    pub fn state(&self) -> &TurnState {
        &self.state
    }

    pub fn phase(&self) -> TurnPhase {
        self.state.phase
    }

    pub fn is_active(&self) -> bool {
        self.state.active
    }

    pub fn flush_deadline(&self) -> Option<Instant> {
        self.state.scheduler.deadline()
    }

    pub fn texts(&self) -> &TurnTexts {
        &self.texts
    }
}

impl Default for TurnReducer {
    fn default() -> Self {
        Self::new(TurnTexts::default(), Arc::new(SystemClock), DEFAULT_FLUSH_INTERVAL)
    }
}
