//! Agent CLI 的 stream-json 输出解析
//!
//! 每行一个 JSON 对象，只关心 `stream_event` 中的 `content_block_delta` 文本增量，其余类型忽略。

use serde::Deserialize;

use crate::transcript::{Message, Role};

#[derive(Debug, Deserialize)]
struct StreamLine {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    event: Option<StreamEvent>,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    text: Option<String>,
}

/// 解析一行输出，返回其中的文本增量；空行、非 JSON 行与无关事件返回 None
pub fn parse_text_delta(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let parsed: StreamLine = serde_json::from_str(line).ok()?;
    if parsed.kind != "stream_event" {
        return None;
    }
    let event = parsed.event?;
    if event.kind != "content_block_delta" {
        return None;
    }
    event.delta?.text.filter(|t| !t.is_empty())
}

/// 把对话历史渲染成 CLI 的单段输入，以 `Assistant:` 结尾提示模型续写
pub fn render_prompt(messages: &[Message]) -> String {
    let mut prompt = String::new();
    for msg in messages {
        let label = match msg.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        prompt.push_str(label);
        prompt.push_str(": ");
        prompt.push_str(&msg.content);
        prompt.push('\n');
    }
    prompt.push_str("Assistant:");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_delta() {
        let line = r#"{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}}"#;
        assert_eq!(parse_text_delta(line).as_deref(), Some("Hel"));
    }

    #[test]
    fn test_ignores_other_lines() {
        assert!(parse_text_delta("").is_none());
        assert!(parse_text_delta("not json").is_none());
        assert!(parse_text_delta(r#"{"type":"system","subtype":"init"}"#).is_none());
        assert!(parse_text_delta(r#"{"type":"stream_event","event":{"type":"message_start"}}"#).is_none());
        assert!(parse_text_delta(
            r#"{"type":"stream_event","event":{"type":"content_block_delta","delta":{"type":"input_json_delta","partial_json":"{"}}}"#
        )
        .is_none());
        assert!(parse_text_delta(
            r#"{"type":"stream_event","event":{"type":"content_block_delta","delta":{"text":""}}}"#
        )
        .is_none());
    }

    #[test]
    fn test_render_prompt() {
        let messages = vec![Message::user("hi"), Message::assistant("hello"), Message::user("again")];
        assert_eq!(
            render_prompt(&messages),
            "User: hi\nAssistant: hello\nUser: again\nAssistant:"
        );
    }
}
