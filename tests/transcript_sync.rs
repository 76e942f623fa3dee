//! 对话记录同步集成测试

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use murmur::agent::scripted::{Script, ScriptedTransport};
    use murmur::agent::TurnTransport;
    use murmur::conversation::{ConversationService, JsonFileStorage};
    use murmur::core::Result;
    use murmur::transcript::{EventSink, Message, Role, TurnEvent, TurnTexts};
    use murmur::workspace::WorkspaceManager;
    use murmur::{SendOutcome, TurnController};
    use tempfile::TempDir;

    /// 像真实传输层一样落盘：先存用户消息，投递事件，最后存完整回复
    struct PersistingTransport {
        conversations: Arc<ConversationService>,
        chunks: Vec<&'static str>,
    }

    #[async_trait]
    impl TurnTransport for PersistingTransport {
        async fn send_with_events(&self, conversation_id: &str, content: &str, sink: EventSink) -> Result<()> {
            let mut conv = self
                .conversations
                .append_message(conversation_id, Message::user(content))
                .await?;
            sink.thinking_started();
            for chunk in &self.chunks {
                sink.content_chunk(*chunk);
                tokio::task::yield_now().await;
            }
            conv.add_message(Message::assistant(self.chunks.concat()));
            self.conversations.update(&conv).await?;
            sink.completed(!self.chunks.is_empty());
            Ok(())
        }
    }

    async fn setup(dir: &TempDir) -> (Arc<ConversationService>, String) {
        let project = dir.path().join("project");
        std::fs::create_dir_all(&project).unwrap();
        let workspaces = Arc::new(WorkspaceManager::load(dir.path().join("workspaces.json")).await);
        let ws = workspaces.open(&project).await.unwrap();
        let storage = Arc::new(JsonFileStorage::new(dir.path().join("conversations")));
        let svc = Arc::new(ConversationService::new(storage, workspaces));
        (svc, ws.path.display().to_string())
    }

    #[tokio::test]
    async fn test_first_message_then_history_reload() {
        let dir = TempDir::new().unwrap();
        let (svc, path) = setup(&dir).await;
        let transport = Arc::new(PersistingTransport {
            conversations: svc.clone(),
            chunks: vec!["Hel", "lo"],
        });

        let mut controller = TurnController::new(transport.clone(), svc.clone());
        controller.load_history(&path).await;
        assert!(controller.transcript().is_empty());

        assert_eq!(controller.send("hi").await.unwrap(), SendOutcome::NeedsConversation);
        assert_eq!(controller.transcript().len(), 1);

        let conv = controller.create_conversation("project", &path).await.unwrap();
        assert_eq!(svc.workspaces().active_conversation_id().await, Some(conv.id.clone()));
        assert_eq!(controller.send("hi").await.unwrap(), SendOutcome::Sent);
        assert_eq!(controller.transcript().last().unwrap().content, "Hello");

        // 新的控制器从磁盘恢复同一段对话
        let mut restored = TurnController::new(transport, svc);
        restored.load_history(&path).await;
        assert_eq!(restored.conversation_id(), Some(conv.id.as_str()));
        let msgs = restored.transcript().snapshot();
        assert_eq!(msgs.len(), 2);
        assert_eq!((msgs[0].role, msgs[0].content.as_str()), (Role::User, "hi"));
        assert_eq!((msgs[1].role, msgs[1].content.as_str()), (Role::Assistant, "Hello"));
    }

    #[tokio::test]
    async fn test_earlier_hello_scenario() {
        let dir = TempDir::new().unwrap();
        let (svc, _) = setup(&dir).await;
        let mut controller = TurnController::new(Arc::new(ScriptedTransport::new()), svc);

        controller.send("earlier").await.unwrap();
        controller.thinking_started();
        controller.content_chunk("Hel");
        controller.content_chunk("lo");
        controller.completed(true);
        controller.end_turn();

        let msgs = controller.transcript().snapshot();
        assert_eq!(msgs.len(), 2);
        assert_eq!((msgs[0].role, msgs[0].content.as_str()), (Role::User, "earlier"));
        assert_eq!((msgs[1].role, msgs[1].content.as_str()), (Role::Assistant, "Hello"));
        assert!(msgs.iter().all(|m| !m.id.is_thinking()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batching_never_changes_content() {
        let dir = TempDir::new().unwrap();
        let (svc, path) = setup(&dir).await;
        let words: Vec<String> = (0..40).map(|i| format!("w{} ", i)).collect();

        for pace in [Duration::from_millis(1), Duration::from_millis(7), Duration::from_millis(40)] {
            let transport = Arc::new(ScriptedTransport::new().with_pace(pace));
            let mut events = vec![TurnEvent::ThinkingStarted];
            events.extend(words.iter().map(|w| TurnEvent::chunk(w.as_str())));
            events.push(TurnEvent::Completed { has_content: true });
            transport.push(Script::Events(events));

            let mut controller = TurnController::new(transport, svc.clone());
            controller.create_conversation("t", &path).await.unwrap();
            controller.send("go").await.unwrap();
            assert_eq!(controller.transcript().last().unwrap().content, words.concat());
            assert!(controller.flush_deadline().is_none());
        }
    }

    #[tokio::test]
    async fn test_turn_active_indicator() {
        let dir = TempDir::new().unwrap();
        let (svc, path) = setup(&dir).await;
        let transport = Arc::new(ScriptedTransport::new().with_pace(Duration::from_millis(5)));
        transport.push_reply(&["a", "b"]);
        let mut controller = TurnController::new(transport, svc);
        controller.create_conversation("t", &path).await.unwrap();

        let mut active = controller.turn_active();
        let watcher = tokio::spawn(async move {
            let mut seen = Vec::new();
            while active.changed().await.is_ok() {
                seen.push(*active.borrow_and_update());
                if seen.len() == 2 {
                    break;
                }
            }
            seen
        });

        controller.send("go").await.unwrap();
        assert_eq!(watcher.await.unwrap(), vec![true, false]);
    }

    #[tokio::test]
    async fn test_empty_reply_and_error_texts() {
        let dir = TempDir::new().unwrap();
        let (svc, path) = setup(&dir).await;
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_reply(&["   "]);
        transport.push(Script::Events(vec![TurnEvent::ThinkingStarted, TurnEvent::errored("boom")]));
        let mut controller = TurnController::new(transport, svc);
        controller.create_conversation("t", &path).await.unwrap();

        controller.send("first").await.unwrap();
        assert_eq!(controller.transcript().last().unwrap().content, TurnTexts::default().no_response);

        controller.send("second").await.unwrap();
        let last = controller.transcript().last().unwrap();
        assert_eq!(last.content, "发生错误: boom");
        assert_eq!(last.role, Role::Assistant);
    }
}
