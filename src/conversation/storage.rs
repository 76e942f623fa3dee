//! 对话存储
//!
//! JSON 文件存储：每个对话一个 `<id>.json`，写入前自动创建目录；另提供内存实现供测试使用。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::model::Conversation;
use crate::core::{DeskError, Result};

/// 对话存储接口
#[async_trait]
pub trait ConversationStorage: Send + Sync {
    async fn save(&self, conversation: &Conversation) -> Result<()>;

    async fn load(&self, id: &str) -> Result<Conversation>;

    async fn delete(&self, id: &str) -> Result<()>;

    /// 列出全部对话；损坏的文件跳过
    async fn list(&self) -> Result<Vec<Conversation>>;
}

/// JSON 文件存储
#[derive(Debug)]
pub struct JsonFileStorage {
    dir: PathBuf,
    lock: RwLock<()>,
}

impl JsonFileStorage {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            lock: RwLock::new(()),
        }
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
            return Err(DeskError::Storage(format!("invalid conversation id {:?}", id)));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }

    async fn read(&self, path: &Path) -> Result<Conversation> {
        let data = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&data)?)
    }
}

#[async_trait]
impl ConversationStorage for JsonFileStorage {
    async fn save(&self, conversation: &Conversation) -> Result<()> {
        let path = self.path_for(&conversation.id)?;
        let data = serde_json::to_string_pretty(conversation)?;
        let _guard = self.lock.write().await;
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&path, data).await?;
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Conversation> {
        let path = self.path_for(id)?;
        let _guard = self.lock.read().await;
        match self.read(&path).await {
            Err(DeskError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(DeskError::NotFound(format!("conversation {}", id)))
            }
            other => other,
        }
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let path = self.path_for(id)?;
        let _guard = self.lock.write().await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(DeskError::NotFound(format!("conversation {}", id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<Conversation>> {
        let _guard = self.lock.read().await;
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut conversations = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.read(&path).await {
                Ok(conv) => conversations.push(conv),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable conversation file"),
            }
        }
        Ok(conversations)
    }
}

/// 内存存储
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: RwLock<HashMap<String, Conversation>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStorage for MemoryStorage {
    async fn save(&self, conversation: &Conversation) -> Result<()> {
        self.inner
            .write()
            .await
            .insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Conversation> {
        self.inner
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| DeskError::NotFound(format!("conversation {}", id)))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.inner
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| DeskError::NotFound(format!("conversation {}", id)))
    }

    async fn list(&self) -> Result<Vec<Conversation>> {
        Ok(self.inner.read().await.values().cloned().collect())
    }
}
