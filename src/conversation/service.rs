//! 对话服务
//!
//! 在存储之上提供对话的增删改查、按工作区路径查找最近对话、追加消息，
//! 并把“当前活跃对话”记录到工作区注册表。

use std::sync::Arc;

use async_trait::async_trait;

use super::model::Conversation;
use super::storage::ConversationStorage;
use crate::core::{DeskError, Result};
use crate::transcript::Message;
use crate::workspace::WorkspaceManager;

/// 轮次控制器依赖的持久化接口（整条记录快照，不做部分更新）
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create(&self, title: &str, workspace_path: &str) -> Result<Conversation>;

    /// 该路径下最近更新的对话；没有则返回 None
    async fn get_by_project_path(&self, path: &str) -> Result<Option<Conversation>>;

    async fn set_active_conversation(&self, id: &str) -> Result<()>;
}

/// 对话服务
pub struct ConversationService {
    storage: Arc<dyn ConversationStorage>,
    workspaces: Arc<WorkspaceManager>,
}

impl ConversationService {
    pub fn new(storage: Arc<dyn ConversationStorage>, workspaces: Arc<WorkspaceManager>) -> Self {
        Self { storage, workspaces }
    }

    pub async fn get(&self, id: &str) -> Result<Conversation> {
        self.storage.load(id).await
    }

    pub async fn list(&self) -> Result<Vec<Conversation>> {
        self.storage.list().await
    }

    /// 最近更新的前 n 个对话
    pub async fn recent(&self, limit: usize) -> Result<Vec<Conversation>> {
        let mut all = self.storage.list().await?;
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        all.truncate(limit);
        Ok(all)
    }

    pub async fn update(&self, conversation: &Conversation) -> Result<()> {
        self.storage.save(conversation).await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.storage.delete(id).await?;
        tracing::info!(conversation_id = %id, "conversation deleted");
        Ok(())
    }

    /// 追加一条消息并立即保存，返回更新后的对话
    pub async fn append_message(&self, id: &str, message: Message) -> Result<Conversation> {
        let mut conv = self.storage.load(id).await?;
        conv.add_message(message);
        self.storage.save(&conv).await?;
        Ok(conv)
    }

    pub fn workspaces(&self) -> &Arc<WorkspaceManager> {
        &self.workspaces
    }
}

#[async_trait]
impl ConversationStore for ConversationService {
    async fn create(&self, title: &str, workspace_path: &str) -> Result<Conversation> {
        let conv = Conversation::new(title, workspace_path);
        self.storage.save(&conv).await?;
        tracing::info!(conversation_id = %conv.id, title = %conv.title, path = %conv.project_path, "conversation created");
        Ok(conv)
    }

    async fn get_by_project_path(&self, path: &str) -> Result<Option<Conversation>> {
        let latest = self
            .storage
            .list()
            .await?
            .into_iter()
            .filter(|c| c.project_path == path)
            .max_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(latest)
    }

    async fn set_active_conversation(&self, id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(DeskError::NotFound("empty conversation id".to_string()));
        }
        self.workspaces.set_active_conversation_id(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::MemoryStorage;
    use tempfile::TempDir;

    fn service() -> ConversationService {
        ConversationService::new(Arc::new(MemoryStorage::new()), Arc::new(WorkspaceManager::in_memory()))
    }

    #[tokio::test]
    async fn test_get_by_project_path_picks_latest() {
        let svc = service();
        let older = svc.create("old", "/proj").await.unwrap();
        let newer = svc.create("new", "/proj").await.unwrap();
        svc.create("other", "/elsewhere").await.unwrap();
        svc.append_message(&newer.id, Message::user("bump")).await.unwrap();

        let found = svc.get_by_project_path("/proj").await.unwrap().unwrap();
        assert_eq!(found.id, newer.id);
        assert_ne!(found.id, older.id);
        assert!(svc.get_by_project_path("/none").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_append_message_persists() {
        let svc = service();
        let conv = svc.create("t", "").await.unwrap();
        svc.append_message(&conv.id, Message::user("one")).await.unwrap();
        svc.append_message(&conv.id, Message::assistant("two")).await.unwrap();
        let loaded = svc.get(&conv.id).await.unwrap();
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.messages[1].content, "two");
    }

    #[tokio::test]
    async fn test_set_active_conversation_records_on_workspace() {
        let dir = TempDir::new().unwrap();
        let svc = service();
        svc.workspaces().open(dir.path()).await.unwrap();
        let conv = svc.create("t", &dir.path().display().to_string()).await.unwrap();
        svc.set_active_conversation(&conv.id).await.unwrap();
        assert_eq!(svc.workspaces().active_conversation_id().await, Some(conv.id));
    }

    #[tokio::test]
    async fn test_recent_orders_by_update_time() {
        let svc = service();
        let a = svc.create("a", "").await.unwrap();
        let _b = svc.create("b", "").await.unwrap();
        svc.append_message(&a.id, Message::user("x")).await.unwrap();
        let recent = svc.recent(1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, a.id);
    }
}
