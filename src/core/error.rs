//! 错误类型
//!
//! 传输层拒绝、持久化失败、路径逃逸等统一为 DeskError；
//! Agent 在流中报告的错误不走这里，而是作为 `TurnEvent::Errored` 数据渲染进对话。

use thiserror::Error;

/// 客户端各子系统可能返回的错误
#[derive(Error, Debug)]
pub enum DeskError {
    /// 启动一轮对话的调用本身失败（尚无任何事件送达）
    #[error("Transport error: {0}")]
    Transport(String),

    /// Agent 进程以非零状态退出
    #[error("Agent process exited with status {code:?}")]
    AgentExited { code: Option<i32> },

    #[error("Agent turn timed out after {0}s")]
    TurnTimeout(u64),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// 相对路径解析后落在工作区根目录之外
    #[error("Path escape attempt: {0}")]
    PathEscape(String),

    #[error("No workspace is open")]
    NoWorkspace,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = DeskError> = std::result::Result<T, E>;
