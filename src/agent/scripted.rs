//! 脚本化传输（用于测试与演示，无需 Agent CLI）
//!
//! 每次调用按队列取一份事件脚本依次投递；队列为空时回显用户输入。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::TurnTransport;
use crate::core::{DeskError, Result};
use crate::transcript::{EventSink, TurnEvent};

/// 一次调用的行为
#[derive(Debug, Clone)]
pub enum Script {
    /// 依次投递事件后正常返回
    Events(Vec<TurnEvent>),
    /// 投递事件后以传输错误返回
    EventsThenFail(Vec<TurnEvent>, String),
    /// 不投递任何事件，直接拒绝
    Reject(String),
}

/// 脚本化传输
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    calls: Mutex<Vec<(String, String)>>,
    /// 相邻事件之间的间隔（让刷新定时器有机会触发）
    pace: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }

    pub fn push(&self, script: Script) -> &Self {
        self.scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(script);
        self
    }

    /// 典型的一轮：思考 → 若干 chunk → 完成
    pub fn push_reply(&self, chunks: &[&str]) -> &Self {
        let mut events = vec![TurnEvent::ThinkingStarted];
        events.extend(chunks.iter().map(|c| TurnEvent::chunk(*c)));
        let has_content = chunks.iter().any(|c| !c.trim().is_empty());
        events.push(TurnEvent::Completed { has_content });
        self.push(Script::Events(events))
    }

    /// 已收到的 (conversation_id, content) 调用记录
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn play(&self, events: Vec<TurnEvent>, sink: &EventSink) {
        for event in events {
            sink.emit(event);
            match self.pace {
                Some(pace) => tokio::time::sleep(pace).await,
                None => tokio::task::yield_now().await,
            }
        }
    }
}

#[async_trait]
impl TurnTransport for ScriptedTransport {
    async fn send_with_events(&self, conversation_id: &str, content: &str, sink: EventSink) -> Result<()> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((conversation_id.to_string(), content.to_string()));

        let script = self
            .scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| {
                Script::Events(vec![
                    TurnEvent::ThinkingStarted,
                    TurnEvent::chunk(format!("Echo: {}", content)),
                    TurnEvent::Completed { has_content: true },
                ])
            });

        match script {
            Script::Events(events) => {
                self.play(events, &sink).await;
                Ok(())
            }
            Script::EventsThenFail(events, reason) => {
                self.play(events, &sink).await;
                Err(DeskError::Transport(reason))
            }
            Script::Reject(reason) => Err(DeskError::Transport(reason)),
        }
    }
}
