//! 对话实体

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::transcript::Message;

/// 持久化的对话记录（整条快照读写，不做部分更新）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub title: String,
    /// 关联的工作区路径（可为空）
    #[serde(default)]
    pub project_path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn new(title: impl Into<String>, project_path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(now),
            title: title.into(),
            project_path: project_path.into(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
        }
    }

    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// conv-<yyyymmddHHMMSS>-<6 位随机字符>
fn generate_id(now: DateTime<Utc>) -> String {
    let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(6).collect();
    format!("conv-{}-{}", now.format("%Y%m%d%H%M%S"), suffix)
}
