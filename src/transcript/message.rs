//! 对话消息
//!
//! 一条消息 = id + 角色 + 内容 + 创建时间。id 前缀区分普通消息、思考占位与错误提示。

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const MESSAGE_PREFIX: &str = "msg-";
const THINKING_PREFIX: &str = "msg-thinking-";
const ERROR_PREFIX: &str = "msg-error-";

/// 消息 id（不透明字符串，全局唯一）
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new() -> Self {
        Self::with_prefix(MESSAGE_PREFIX)
    }

    /// 思考占位消息的哨兵 id
    pub fn thinking() -> Self {
        Self::with_prefix(THINKING_PREFIX)
    }

    pub fn error() -> Self {
        Self::with_prefix(ERROR_PREFIX)
    }

    fn with_prefix(prefix: &str) -> Self {
        Self(format!("{}{}", prefix, uuid::Uuid::new_v4().simple()))
    }

    pub fn is_thinking(&self) -> bool {
        self.0.starts_with(THINKING_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// 消息角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// 单条消息
///
/// `user` 消息创建后内容不可变；`assistant` 消息只在作为当前轮次的流式目标时
/// 由刷新调度器追加内容，轮次结束后同样不可变。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// 历史数据缺失 id 时补一个新的
    #[serde(default)]
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(id: MessageId, role: Role, content: impl Into<String>) -> Self {
        Self {
            id,
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageId::new(), Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageId::new(), Role::Assistant, content)
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }
}
