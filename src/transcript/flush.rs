//! 流式刷新调度
//!
//! 高频到达的 chunk 先进缓冲区，定时器到点后一次性写入流式消息，展示层不必每个 token 重绘。
//! 定时器建模为注入时钟上的截止时间：`buffer` 在未布防时设置截止时间，`flush` 总是撤防。
//! 真正的等待由驱动方（轮次控制器的 select 循环）完成，测试里用 [`ManualClock`] 推进。

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use super::message::MessageId;
use super::store::Transcript;

/// 默认刷新间隔：一帧（约 60fps）
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(16);

/// 时钟抽象
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
}

/// tokio 时钟（遵循 `tokio::time::pause`）
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// 手动推进的时钟，用于确定性测试
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 刷新调度器：待写缓冲 + 至多一个已布防的定时器
pub struct FlushScheduler {
    clock: Arc<dyn Clock>,
    interval: Duration,
    pending: String,
    deadline: Option<Instant>,
}

impl FlushScheduler {
    pub fn new(clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            clock,
            interval,
            pending: String::new(),
            deadline: None,
        }
    }

    /// 追加到待写缓冲；未布防时以固定间隔布防
    pub fn buffer(&mut self, text: &str) {
        self.pending.push_str(text);
        if self.deadline.is_none() {
            self.deadline = Some(self.clock.now() + self.interval);
        }
    }

    /// 将缓冲内容追加到流式消息末尾并清空缓冲，同时撤防。可重复调用。
    ///
    /// 没有流式目标时缓冲保留，等目标确定后再写入。返回本次写入的字节数。
    pub fn flush(&mut self, transcript: &mut Transcript, target: Option<&MessageId>) -> usize {
        self.deadline = None;
        let Some(target) = target else {
            return 0;
        };
        if self.pending.is_empty() {
            return 0;
        }
        let text = std::mem::take(&mut self.pending);
        if !transcript.append_content(target, &text) {
            tracing::warn!(target_id = %target, dropped = text.len(), "streaming target vanished before flush");
            return 0;
        }
        tracing::debug!(target_id = %target, flushed = text.len(), "flushed streaming buffer");
        text.len()
    }

    /// 定时器回调：已布防且到点时刷新一次
    pub fn fire_if_due(&mut self, transcript: &mut Transcript, target: Option<&MessageId>) -> bool {
        if !self.is_due() {
            return false;
        }
        self.flush(transcript, target);
        true
    }

    pub fn is_due(&self) -> bool {
        self.deadline.is_some_and(|d| d <= self.clock.now())
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// 丢弃缓冲并撤防（只在强制刷新之后调用）
    pub fn reset(&mut self) {
        self.pending.clear();
        self.deadline = None;
    }
}

impl fmt::Debug for FlushScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlushScheduler")
            .field("interval", &self.interval)
            .field("pending_len", &self.pending.len())
            .field("armed", &self.deadline.is_some())
            .finish()
    }
}
