//! 对话记录存储
//!
//! 有序消息列表，只支持尾部追加与按 id 删除，不重排。消息列表本身放在 `watch` 通道里，
//! 写入方通过 [`Transcript`] 原地修改，展示层只能拿到只读的 [`TranscriptView`]。
//!
//! 写入约束：只有轮次归约器（结构变更）与刷新调度器（流式内容追加）会修改记录，
//! 其他组件（包括展示层）只读。内容追加入口 `append_content` 因此仅在 crate 内可见。

use tokio::sync::watch;

use super::message::{Message, MessageId};

/// 对话记录（写入端）
#[derive(Debug)]
pub struct Transcript {
    messages: watch::Sender<Vec<Message>>,
    /// 当前思考占位消息的 id（至多一个）
    placeholder: Option<MessageId>,
    /// 下标小于该值的消息属于已结束的轮次，内容不可再变
    sealed_len: usize,
}

impl Transcript {
    pub fn new() -> Self {
        let (messages, _) = watch::channel(Vec::new());
        Self {
            messages,
            placeholder: None,
            sealed_len: 0,
        }
    }

    /// 只读视图，供展示层订阅
    pub fn view(&self) -> TranscriptView {
        TranscriptView {
            rx: self.messages.subscribe(),
        }
    }

    /// 追加到末尾
    pub fn append(&mut self, message: Message) {
        self.messages.send_modify(|msgs| msgs.push(message));
    }

    /// 追加思考占位消息并记住其 id
    pub fn insert_placeholder(&mut self, message: Message) {
        self.placeholder = Some(message.id.clone());
        self.append(message);
    }

    /// 删除第一条匹配 id 的消息；不存在时什么也不做，可重复调用
    pub fn remove_by_id(&mut self, id: &MessageId) -> bool {
        if self.placeholder.as_ref() == Some(id) {
            self.placeholder = None;
        }
        let mut removed_at = None;
        self.messages.send_if_modified(|msgs| {
            match msgs.iter().position(|m| &m.id == id) {
                Some(idx) => {
                    msgs.remove(idx);
                    removed_at = Some(idx);
                    true
                }
                None => false,
            }
        });
        match removed_at {
            Some(idx) => {
                if idx < self.sealed_len {
                    self.sealed_len -= 1;
                }
                true
            }
            None => false,
        }
    }

    /// 最后一条满足条件的消息
    pub fn find_last<P>(&self, predicate: P) -> Option<Message>
    where
        P: Fn(&Message) -> bool,
    {
        self.messages.borrow().iter().rev().find(|m| predicate(m)).cloned()
    }

    pub fn last(&self) -> Option<Message> {
        self.messages.borrow().last().cloned()
    }

    pub fn get(&self, id: &MessageId) -> Option<Message> {
        self.messages.borrow().iter().find(|m| &m.id == id).cloned()
    }

    /// 将文本追加到指定消息内容末尾（不替换）。目标已被删除时返回 false
    pub(crate) fn append_content(&mut self, id: &MessageId, text: &str) -> bool {
        self.messages.send_if_modified(|msgs| {
            match msgs.iter_mut().rev().find(|m| &m.id == id) {
                Some(msg) => {
                    msg.content.push_str(text);
                    true
                }
                None => false,
            }
        })
    }

    /// 消息是否仍属于未结束的轮次
    pub fn is_open(&self, id: &MessageId) -> bool {
        self.messages
            .borrow()
            .iter()
            .position(|m| &m.id == id)
            .is_some_and(|idx| idx >= self.sealed_len)
    }

    /// 将当前所有消息标记为已定稿（轮次结束时调用）
    pub fn seal(&mut self) {
        self.sealed_len = self.len();
    }

    /// 整体替换（加载历史）；替换进来的消息全部视为已定稿
    pub fn replace_all(&mut self, messages: Vec<Message>) {
        self.placeholder = None;
        self.sealed_len = messages.len();
        self.messages.send_replace(messages);
    }

    pub fn clear(&mut self) {
        self.replace_all(Vec::new());
    }

    pub fn placeholder_id(&self) -> Option<&MessageId> {
        self.placeholder.as_ref()
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

/// 对话记录的只读视图（展示层持有）
#[derive(Clone, Debug)]
pub struct TranscriptView {
    rx: watch::Receiver<Vec<Message>>,
}

impl TranscriptView {
    pub fn snapshot(&self) -> Vec<Message> {
        self.rx.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.rx.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 等待下一次变更；写入端已销毁时返回 false
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// 取最新快照并标记为已读
    pub fn latest(&mut self) -> Vec<Message> {
        self.rx.borrow_and_update().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::message::Role;

    #[test]
    fn test_remove_by_id_is_idempotent() {
        let mut t = Transcript::new();
        let msg = Message::user("hi");
        let id = msg.id.clone();
        t.append(msg);
        assert!(t.remove_by_id(&id));
        assert!(!t.remove_by_id(&id));
        assert!(t.is_empty());
    }

    #[test]
    fn test_placeholder_tracking() {
        let mut t = Transcript::new();
        let placeholder = Message::new(MessageId::thinking(), Role::Assistant, "...");
        let id = placeholder.id.clone();
        t.insert_placeholder(placeholder);
        assert_eq!(t.placeholder_id(), Some(&id));
        t.remove_by_id(&id);
        assert!(t.placeholder_id().is_none());
    }

    #[test]
    fn test_find_last_returns_latest_match() {
        let mut t = Transcript::new();
        t.append(Message::assistant("first"));
        t.append(Message::user("q"));
        t.append(Message::assistant("second"));
        let found = t.find_last(|m| m.is_assistant()).unwrap();
        assert_eq!(found.content, "second");
        assert!(t.find_last(|m| m.content == "missing").is_none());
    }

    #[test]
    fn test_append_content_extends_in_place() {
        let mut t = Transcript::new();
        let msg = Message::assistant("Hel");
        let id = msg.id.clone();
        t.append(msg);
        assert!(t.append_content(&id, "lo"));
        assert_eq!(t.get(&id).unwrap().content, "Hello");
        assert!(!t.append_content(&MessageId::new(), "x"));
    }

    #[test]
    fn test_seal_closes_existing_messages() {
        let mut t = Transcript::new();
        let old = Message::assistant("old");
        let old_id = old.id.clone();
        t.append(old);
        assert!(t.is_open(&old_id));
        t.seal();
        assert!(!t.is_open(&old_id));

        let fresh = Message::assistant("new");
        let fresh_id = fresh.id.clone();
        t.append(fresh);
        assert!(t.is_open(&fresh_id));
    }

    #[test]
    fn test_replace_all_seals_history() {
        let mut t = Transcript::new();
        let loaded = vec![Message::user("a"), Message::assistant("b")];
        let last_id = loaded[1].id.clone();
        t.replace_all(loaded);
        assert_eq!(t.len(), 2);
        assert!(!t.is_open(&last_id));
    }

    #[tokio::test]
    async fn test_view_observes_mutations() {
        let mut t = Transcript::new();
        let mut view = t.view();
        t.append(Message::user("hello"));
        assert!(view.changed().await);
        let snap = view.latest();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].content, "hello");
    }
}
