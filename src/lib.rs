//! Murmur - 流式 Agent 客户端的对话记录同步
//!
//! 模块划分：
//! - **transcript**: 对话记录、轮次归约器、刷新调度与轮次控制器（核心）
//! - **agent**: 轮次传输层（Agent CLI 子进程 / 脚本化传输）
//! - **conversation**: 对话持久化（JSON 文件 / 内存）与对话服务
//! - **workspace**: 工作区注册表与沙箱化文件访问
//! - **detector**: 运行环境检测（Agent CLI、Node.js、npm、网络连通性、Git）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与优雅关闭
//! - **observability**: 日志初始化

pub mod agent;
pub mod config;
pub mod conversation;
pub mod core;
pub mod detector;
pub mod observability;
pub mod transcript;
pub mod workspace;

pub use transcript::{SendOutcome, TurnController};
