//! 工作区注册表
//!
//! 记录打开过的工作区（路径、名称、最后打开时间、活跃对话 id）与当前工作区，
//! 每次变更后写回 `workspaces.json`。

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::files::WorkspaceFs;
use crate::core::{DeskError, Result};

/// 单个工作区
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub path: PathBuf,
    pub name: String,
    pub last_opened: DateTime<Utc>,
    #[serde(default)]
    pub active_conversation_id: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Registry {
    #[serde(default)]
    workspaces: Vec<Workspace>,
    #[serde(default)]
    current_path: Option<PathBuf>,
}

impl Registry {
    fn current(&self) -> Option<&Workspace> {
        let current = self.current_path.as_ref()?;
        self.workspaces.iter().find(|w| &w.path == current)
    }

    fn current_mut(&mut self) -> Option<&mut Workspace> {
        let current = self.current_path.clone()?;
        self.workspaces.iter_mut().find(|w| w.path == current)
    }
}

/// 工作区管理器
#[derive(Debug)]
pub struct WorkspaceManager {
    registry_path: Option<PathBuf>,
    inner: RwLock<Registry>,
}

impl WorkspaceManager {
    /// 从注册表文件加载；文件不存在或损坏时从空表开始
    pub async fn load(registry_path: impl AsRef<Path>) -> Self {
        let registry_path = registry_path.as_ref().to_path_buf();
        let registry = match tokio::fs::read_to_string(&registry_path).await {
            Ok(data) => serde_json::from_str(&data).unwrap_or_else(|e| {
                tracing::warn!(path = %registry_path.display(), error = %e, "corrupt workspace registry, starting empty");
                Registry::default()
            }),
            Err(_) => Registry::default(),
        };
        Self {
            registry_path: Some(registry_path),
            inner: RwLock::new(registry),
        }
    }

    /// 不落盘的管理器
    pub fn in_memory() -> Self {
        Self {
            registry_path: None,
            inner: RwLock::new(Registry::default()),
        }
    }

    /// 打开工作区（不在表中则新增），并设为当前
    pub async fn open(&self, path: impl AsRef<Path>) -> Result<Workspace> {
        let path = path.as_ref();
        let abs = tokio::fs::canonicalize(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DeskError::NotFound(path.display().to_string())
            } else {
                DeskError::Io(e)
            }
        })?;

        let mut registry = self.inner.write().await;
        let now = Utc::now();
        let workspace = match registry.workspaces.iter().position(|w| w.path == abs) {
            Some(idx) => {
                let existing = &mut registry.workspaces[idx];
                existing.last_opened = now;
                existing.clone()
            }
            None => {
                let name = abs
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| abs.display().to_string());
                let workspace = Workspace {
                    path: abs.clone(),
                    name,
                    last_opened: now,
                    active_conversation_id: None,
                };
                registry.workspaces.push(workspace.clone());
                workspace
            }
        };
        registry.current_path = Some(abs);
        tracing::info!(path = %workspace.path.display(), "workspace opened");
        self.persist(&registry).await;
        Ok(workspace)
    }

    /// 切换到已登记的工作区
    pub async fn select(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut registry = self.inner.write().await;
        let Some(ws) = registry.workspaces.iter_mut().find(|w| w.path == path) else {
            return Err(DeskError::NotFound(path.display().to_string()));
        };
        ws.last_opened = Utc::now();
        registry.current_path = Some(path.to_path_buf());
        self.persist(&registry).await;
        Ok(())
    }

    /// 从表中移除；若是当前工作区则一并关闭
    pub async fn remove(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut registry = self.inner.write().await;
        registry.workspaces.retain(|w| w.path != path);
        if registry.current_path.as_deref() == Some(path) {
            registry.current_path = None;
        }
        self.persist(&registry).await;
    }

    pub async fn close(&self) {
        let mut registry = self.inner.write().await;
        registry.current_path = None;
        self.persist(&registry).await;
    }

    pub async fn current(&self) -> Option<Workspace> {
        self.inner.read().await.current().cloned()
    }

    /// 全部工作区，最近打开的在前
    pub async fn list(&self) -> Vec<Workspace> {
        let mut all = self.inner.read().await.workspaces.clone();
        all.sort_by(|a, b| b.last_opened.cmp(&a.last_opened));
        all
    }

    pub async fn set_active_conversation_id(&self, conversation_id: &str) -> Result<()> {
        let mut registry = self.inner.write().await;
        let ws = registry.current_mut().ok_or(DeskError::NoWorkspace)?;
        ws.active_conversation_id = Some(conversation_id.to_string());
        self.persist(&registry).await;
        Ok(())
    }

    pub async fn active_conversation_id(&self) -> Option<String> {
        self.inner
            .read()
            .await
            .current()
            .and_then(|w| w.active_conversation_id.clone())
    }

    /// 当前工作区的文件访问入口
    pub async fn files(&self) -> Result<WorkspaceFs> {
        let registry = self.inner.read().await;
        let ws = registry.current().ok_or(DeskError::NoWorkspace)?;
        Ok(WorkspaceFs::new(&ws.path))
    }

    /// 写回注册表；失败只记录日志，不影响内存中的状态
    async fn persist(&self, registry: &Registry) {
        let Some(path) = &self.registry_path else {
            return;
        };
        let result = async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let data = serde_json::to_string_pretty(registry)?;
            tokio::fs::write(path, data).await?;
            Ok::<_, DeskError>(())
        }
        .await;
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "failed to save workspace registry");
        }
    }
}
