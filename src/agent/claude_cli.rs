//! Agent CLI 传输
//!
//! 每轮启动一次 `<command> --print <prompt> --output-format stream-json ...` 子进程：
//! 工作目录为对话关联的项目路径，stdout 逐行解析文本增量并投递为 chunk，stderr 只记 debug 日志。
//! 用户消息在启动前落盘，完整回复在进程正常退出后落盘。

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;

use super::stream_json::{parse_text_delta, render_prompt};
use super::TurnTransport;
use crate::config::AgentSection;
use crate::conversation::ConversationService;
use crate::core::{DeskError, Result};
use crate::transcript::{EventSink, Message};

/// 单行 JSON 的最大长度
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Agent CLI 传输
pub struct ClaudeCliTransport {
    conversations: Arc<ConversationService>,
    command: String,
    extra_args: Vec<String>,
    turn_timeout: Duration,
    cancel: CancellationToken,
}

impl ClaudeCliTransport {
    pub fn new(conversations: Arc<ConversationService>, cfg: &AgentSection) -> Self {
        Self {
            conversations,
            command: cfg.command.clone(),
            extra_args: cfg.extra_args.clone(),
            turn_timeout: Duration::from_secs(cfg.turn_timeout_secs),
            cancel: CancellationToken::new(),
        }
    }

    /// 取消时终止正在运行的子进程
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    fn build_command(&self, prompt: &str, project_path: &str) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.arg("--print")
            .arg(prompt)
            .args(&self.extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !project_path.is_empty() && Path::new(project_path).is_dir() {
            cmd.current_dir(project_path);
        }
        cmd
    }
}

#[async_trait]
impl TurnTransport for ClaudeCliTransport {
    async fn send_with_events(&self, conversation_id: &str, content: &str, sink: EventSink) -> Result<()> {
        tracing::info!(conversation_id = %conversation_id, content_len = content.len(), "agent turn start");

        // 尚未投递任何事件：失败直接返回
        let mut conv = self
            .conversations
            .append_message(conversation_id, Message::user(content))
            .await?;

        sink.thinking_started();

        let prompt = render_prompt(&conv.messages);
        let mut child = match self.build_command(&prompt, &conv.project_path).spawn() {
            Ok(child) => child,
            Err(e) => {
                let reason = format!("failed to start {}: {}", self.command, e);
                sink.errored(reason.clone());
                return Err(DeskError::Transport(reason));
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        if let Some(stderr) = stderr {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(line = %line, "agent stderr");
                }
            });
        }

        let mut reply = String::new();
        let mut has_content = false;
        let mut chunk_count = 0usize;

        let run = async {
            if let Some(stdout) = stdout {
                let mut lines = FramedRead::new(stdout, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
                while let Some(line) = lines.next().await {
                    match line {
                        Ok(line) => {
                            let Some(text) = parse_text_delta(&line) else {
                                continue;
                            };
                            chunk_count += 1;
                            if !text.trim().is_empty() {
                                has_content = true;
                            }
                            tracing::debug!(chunk = chunk_count, len = text.len(), "agent chunk");
                            reply.push_str(&text);
                            sink.content_chunk(text);
                        }
                        Err(LinesCodecError::MaxLineLengthExceeded) => {
                            tracing::warn!("agent output line exceeded {} bytes, skipped", MAX_LINE_BYTES);
                        }
                        Err(LinesCodecError::Io(e)) => {
                            tracing::warn!(error = %e, "agent stdout read failed");
                            break;
                        }
                    }
                }
            }
            child.wait().await
        };

        let finished = tokio::select! {
            res = tokio::time::timeout(self.turn_timeout, run) => Some(res),
            _ = self.cancel.cancelled() => None,
        };

        let status = match finished {
            None => {
                let _ = child.kill().await;
                sink.errored("cancelled");
                return Err(DeskError::Transport("agent turn cancelled".to_string()));
            }
            Some(Err(_)) => {
                let _ = child.kill().await;
                let secs = self.turn_timeout.as_secs();
                sink.errored(format!("agent timed out after {}s", secs));
                return Err(DeskError::TurnTimeout(secs));
            }
            Some(Ok(Err(e))) => {
                sink.errored(e.to_string());
                return Err(e.into());
            }
            Some(Ok(Ok(status))) => status,
        };

        if !status.success() {
            tracing::warn!(status = %status, "agent process failed");
            sink.errored(format!("claude command failed: {}", status));
            return Err(DeskError::AgentExited { code: status.code() });
        }

        if has_content {
            conv.add_message(Message::assistant(reply));
            if let Err(e) = self.conversations.update(&conv).await {
                tracing::warn!(conversation_id = %conversation_id, error = %e, "failed to persist assistant reply");
            }
        }

        tracing::info!(conversation_id = %conversation_id, chunks = chunk_count, has_content, "agent turn complete");
        sink.completed(has_content);
        Ok(())
    }
}
