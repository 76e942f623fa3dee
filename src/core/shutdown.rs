//! 优雅关闭
//!
//! Ctrl+C / SIGTERM / `/quit` 都归结为取消同一个 CancellationToken。
//! 正在运行的 Agent 子进程持有子 token，关闭时被终止；主循环等待 token 后退出。

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

/// 关闭原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// 用户主动退出（Ctrl+C 或 /quit）
    UserInitiated,
    /// SIGTERM
    Signal,
}

/// 关闭信号管理器
#[derive(Debug, Default)]
pub struct ShutdownManager {
    token: CancellationToken,
    /// 第一次触发关闭的原因，之后的重复触发不覆盖
    reason: Mutex<Option<ShutdownReason>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 子 token：单轮对话的 Agent 进程使用，关闭时一并取消
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        {
            let mut current = self.reason.lock().unwrap_or_else(|e| e.into_inner());
            if current.is_none() {
                *current = Some(reason);
                tracing::info!(reason = ?reason, "shutdown requested");
            }
        }
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        *self.reason.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// 监听 Ctrl+C 与 SIGTERM（unix）
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let reason = tokio::select! {
                res = tokio::signal::ctrl_c() => match res {
                    Ok(()) => ShutdownReason::UserInitiated,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to listen for Ctrl+C");
                        return;
                    }
                },
                _ = terminate() => ShutdownReason::Signal,
                _ = manager.wait_for_shutdown() => return,
            };
            manager.shutdown(reason);
        });
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_cancels_child_tokens() {
        let manager = ShutdownManager::new();
        let child = manager.child_token();
        assert!(!child.is_cancelled());
        manager.shutdown(ShutdownReason::UserInitiated);
        assert!(manager.is_shutdown());
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn test_first_reason_wins() {
        let manager = ShutdownManager::new();
        assert!(manager.reason().is_none());
        manager.shutdown(ShutdownReason::Signal);
        manager.shutdown(ShutdownReason::UserInitiated);
        manager.wait_for_shutdown().await;
        assert_eq!(manager.reason(), Some(ShutdownReason::Signal));
    }
}
