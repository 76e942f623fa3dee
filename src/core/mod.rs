//! 核心层：错误类型与优雅关闭

pub mod error;
pub mod shutdown;

pub use error::{DeskError, Result};
pub use shutdown::{ShutdownManager, ShutdownReason};
