//! 轮次控制器（对外入口）
//!
//! 负责一轮对话的完整时序：立即追加用户消息 → 调用传输层 → 把事件逐个交给归约器 →
//! 无论以何种方式结束，都强制刷新缓冲并复位轮次状态。
//!
//! 复位由 [`ActiveTurn`] 守卫的 `Drop` 完成，覆盖正常返回、传输层报错以及 `send` 的 future
//! 被中途丢弃三种出口。

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};

use super::events::{EventSink, TurnEvent};
use super::message::Message;
use super::reducer::TurnReducer;
use super::store::{Transcript, TranscriptView};
use crate::agent::TurnTransport;
use crate::conversation::{Conversation, ConversationStore};
use crate::core::Result;

/// `send` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// 还没有对话，调用方需先创建；用户消息已经在记录里
    NeedsConversation,
    /// 本轮已结束（成功或 Agent 报错都算）
    Sent,
}

/// 进行中的轮次；销毁时执行统一清理
struct ActiveTurn<'a> {
    transcript: &'a mut Transcript,
    reducer: &'a mut TurnReducer,
    turn_active: &'a watch::Sender<bool>,
}

impl<'a> ActiveTurn<'a> {
    fn begin(
        transcript: &'a mut Transcript,
        reducer: &'a mut TurnReducer,
        turn_active: &'a watch::Sender<bool>,
    ) -> Self {
        reducer.begin_turn();
        turn_active.send_replace(true);
        Self {
            transcript,
            reducer,
            turn_active,
        }
    }
}

impl Drop for ActiveTurn<'_> {
    fn drop(&mut self) {
        self.reducer.end_turn(self.transcript);
        self.turn_active.send_replace(false);
        tracing::debug!("turn state reset");
    }
}

/// 轮次控制器
pub struct TurnController {
    transcript: Transcript,
    reducer: TurnReducer,
    transport: Arc<dyn TurnTransport>,
    conversations: Arc<dyn ConversationStore>,
    conversation_id: Option<String>,
    turn_active: watch::Sender<bool>,
}

impl TurnController {
    pub fn new(transport: Arc<dyn TurnTransport>, conversations: Arc<dyn ConversationStore>) -> Self {
        Self::with_reducer(transport, conversations, TurnReducer::default())
    }

    pub fn with_reducer(
        transport: Arc<dyn TurnTransport>,
        conversations: Arc<dyn ConversationStore>,
        reducer: TurnReducer,
    ) -> Self {
        let (turn_active, _) = watch::channel(false);
        Self {
            transcript: Transcript::new(),
            reducer,
            transport,
            conversations,
            conversation_id: None,
            turn_active,
        }
    }

    /// 发送用户消息并运行一整轮
    ///
    /// 用户消息总是先进入记录。没有对话时返回 [`SendOutcome::NeedsConversation`]；
    /// 传输层的错误原样返回，但轮次状态依然会被清理。
    pub async fn send(&mut self, content: &str) -> Result<SendOutcome> {
        self.transcript.append(Message::user(content));

        let Some(conversation_id) = self.conversation_id.clone() else {
            tracing::info!("no conversation yet, caller must create one");
            return Ok(SendOutcome::NeedsConversation);
        };

        tracing::info!(conversation_id = %conversation_id, content_len = content.len(), "turn started");
        let transport = self.transport.clone();
        let (sink, mut rx) = EventSink::channel();

        let turn = ActiveTurn::begin(&mut self.transcript, &mut self.reducer, &self.turn_active);
        let mut turn_fut = transport.send_with_events(&conversation_id, content, sink);
        let mut events_open = true;

        let result = loop {
            let deadline = turn.reducer.flush_deadline();
            tokio::select! {
                biased;
                event = rx.recv(), if events_open => match event {
                    Some(event) => turn.reducer.apply(turn.transcript, event),
                    None => events_open = false,
                },
                res = &mut turn_fut => break res,
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    turn.reducer.on_timer(turn.transcript);
                }
            }
        };

        // 传输层返回前已投递、尚未取走的事件
        while let Ok(event) = rx.try_recv() {
            turn.reducer.apply(turn.transcript, event);
        }
        drop(turn);

        match result {
            Ok(()) => {
                tracing::info!(conversation_id = %conversation_id, "turn finished");
                Ok(SendOutcome::Sent)
            }
            Err(e) => {
                tracing::warn!(conversation_id = %conversation_id, error = %e, "turn transport failed");
                Err(e)
            }
        }
    }

    /// 按工作区路径整体替换记录；任何失败都退回空记录
    pub async fn load_history(&mut self, project_path: &str) {
        self.reducer.reset();
        match self.conversations.get_by_project_path(project_path).await {
            Ok(Some(conv)) if !conv.messages.is_empty() => {
                tracing::info!(
                    conversation_id = %conv.id,
                    messages = conv.messages.len(),
                    "history loaded"
                );
                self.transcript.replace_all(conv.messages);
                self.conversation_id = Some(conv.id.clone());
                if let Err(e) = self.conversations.set_active_conversation(&conv.id).await {
                    tracing::warn!(conversation_id = %conv.id, error = %e, "failed to mark conversation active");
                }
            }
            Ok(_) => {
                self.transcript.clear();
                self.conversation_id = None;
            }
            Err(e) => {
                tracing::warn!(path = %project_path, error = %e, "history load failed, starting empty");
                self.transcript.clear();
                self.conversation_id = None;
            }
        }
    }

    /// 新建对话并设为当前对话，记录清空
    pub async fn create_conversation(&mut self, title: &str, workspace_path: &str) -> Result<Conversation> {
        let conv = self.conversations.create(title, workspace_path).await?;
        self.conversation_id = Some(conv.id.clone());
        self.reducer.reset();
        self.transcript.clear();
        if let Err(e) = self.conversations.set_active_conversation(&conv.id).await {
            tracing::warn!(conversation_id = %conv.id, error = %e, "failed to mark conversation active");
        }
        Ok(conv)
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn view(&self) -> TranscriptView {
        self.transcript.view()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// 轮次是否进行中（展示层订阅）
    pub fn turn_active(&self) -> watch::Receiver<bool> {
        self.turn_active.subscribe()
    }

    pub fn reducer(&self) -> &TurnReducer {
        &self.reducer
    }

    // 以下入口供自行驱动传输层的集成代码使用

    pub fn thinking_started(&mut self) {
        self.reducer.thinking_started(&mut self.transcript);
    }

    pub fn content_chunk(&mut self, text: &str) {
        self.reducer.content_chunk(&mut self.transcript, text);
    }

    pub fn completed(&mut self, has_content: bool) {
        self.reducer.completed(&mut self.transcript, has_content);
    }

    pub fn errored(&mut self, message: &str) {
        self.reducer.errored(&mut self.transcript, message);
    }

    pub fn apply(&mut self, event: TurnEvent) {
        self.reducer.apply(&mut self.transcript, event);
    }

    pub fn flush(&mut self) -> usize {
        self.reducer.flush(&mut self.transcript)
    }

    /// 刷新定时器到点时调用；返回是否执行了刷新
    pub fn poll_flush(&mut self) -> bool {
        self.reducer.on_timer(&mut self.transcript)
    }

    pub fn flush_deadline(&self) -> Option<Instant> {
        self.reducer.flush_deadline()
    }

    /// 集成代码自行结束一轮时调用
    pub fn end_turn(&mut self) {
        self.reducer.end_turn(&mut self.transcript);
        self.turn_active.send_replace(false);
    }
}
