//! 工作区：注册表（打开/切换/活跃对话）与沙箱文件访问

pub mod files;
pub mod registry;

pub use files::{FileInfo, FileKind, WorkspaceFs};
pub use registry::{Workspace, WorkspaceManager};
