//! Translation from Claude JSONL transcript lines to domain [`Record`]s.
//!
//! Only `user` and `assistant` lines carry conversation content; every other
//! line type (`summary`, `file-history-snapshot`, …) translates to nothing.

use chrono::{DateTime, Utc};
use serde_json::Value;
use topicmux_core::types::{Record, RecordKind, Role};

/// Text Claude writes as a tool result when the user interrupts a tool.
pub const INTERRUPTED_TEXT: &str = "[Request interrupted by user for tool use]";

/// Assistant placeholder for an empty turn.
const NO_CONTENT_PLACEHOLDER: &str = "(no content)";

/// User-text markers injected by the harness rather than typed by the user.
const SYSTEM_TAGS: &[&str] = &[
    "<bash-input",
    "<bash-stdout",
    "<bash-stderr",
    "<local-command-caveat",
    "<system-reminder",
];

/// Per-session translator.
///
/// A slash command arrives as two user lines: the `<command-name>` echo and
/// then its `<local-command-stdout>`. The name is carried from the first to
/// the second, across polls if need be.
#[derive(Debug, Default, Clone)]
pub struct Translator {
    last_command: Option<String>,
}

impl Translator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn translate(&mut self, line: &Value) -> Vec<Record> {
        let timestamp = line
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc));

        let line_type = line.get("type").and_then(Value::as_str).unwrap_or("");
        if line_type != "user" && line_type != "assistant" {
            return Vec::new();
        }
        let Some(content) = line.get("message").and_then(|m| m.get("content")) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        let mut push = |kind: RecordKind| out.push(Record::at(kind, timestamp));

        if line_type == "user" {
            let joined = plain_text(content);
            if let Some(output) = between(&joined, "<local-command-stdout>", "</local-command-stdout>") {
                let name = between(&joined, "<command-name>", "</command-name>")
                    .map(str::to_string)
                    .or_else(|| self.last_command.take());
                self.last_command = None;
                push(RecordKind::LocalCommand {
                    name,
                    output: output.trim().to_string(),
                });
                return out;
            }
            if let Some(name) = between(&joined, "<command-name>", "</command-name>") {
                self.last_command = Some(name.to_string());
                return out;
            }
        }
        self.last_command = None;

        match (line_type, content) {
            ("user", Value::String(s)) => {
                let t = s.trim();
                if !t.is_empty() && !is_system_text(t) {
                    push(RecordKind::Text {
                        role: Role::User,
                        text: t.to_string(),
                    });
                }
            }
            ("assistant", Value::String(s)) => {
                let t = s.trim();
                if !t.is_empty() && t != NO_CONTENT_PLACEHOLDER {
                    push(RecordKind::Text {
                        role: Role::Assistant,
                        text: t.to_string(),
                    });
                }
            }
            ("assistant", Value::Array(blocks)) => assistant_blocks(blocks, &mut push),
            ("user", Value::Array(blocks)) => user_blocks(blocks, &mut push),
            _ => {}
        }
        out
    }
}

fn assistant_blocks(blocks: &[Value], push: &mut impl FnMut(RecordKind)) {
    let mut has_text = false;
    for block in blocks {
        match block_type(block) {
            "text" => {
                let t = str_field(block, "text").trim();
                if !t.is_empty() && t != NO_CONTENT_PLACEHOLDER {
                    has_text = true;
                    push(RecordKind::Text {
                        role: Role::Assistant,
                        text: t.to_string(),
                    });
                }
            }
            "thinking" => {
                let t = str_field(block, "thinking").trim();
                if !t.is_empty() {
                    push(RecordKind::Thinking { text: t.to_string() });
                } else if !has_text {
                    push(RecordKind::Thinking {
                        text: "(thinking)".to_string(),
                    });
                }
            }
            "tool_use" => {
                let name = block
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                let input = block.get("input").cloned().unwrap_or(Value::Null);
                if name == "ExitPlanMode" {
                    let plan = str_field(&input, "plan").trim();
                    if !plan.is_empty() {
                        push(RecordKind::Text {
                            role: Role::Assistant,
                            text: plan.to_string(),
                        });
                    }
                }
                push(RecordKind::Invocation {
                    invocation_id: str_field(block, "id").to_string(),
                    name,
                    input,
                });
            }
            _ => {}
        }
    }
}

fn user_blocks(blocks: &[Value], push: &mut impl FnMut(RecordKind)) {
    let mut text_parts: Vec<&str> = Vec::new();
    for block in blocks {
        if let Some(s) = block.as_str() {
            let t = s.trim();
            if !t.is_empty() {
                text_parts.push(t);
            }
            continue;
        }
        match block_type(block) {
            "tool_result" => {
                let text = result_text(block.get("content").unwrap_or(&Value::Null));
                let interrupted = text.trim() == INTERRUPTED_TEXT;
                push(RecordKind::Result {
                    invocation_id: str_field(block, "tool_use_id").to_string(),
                    is_error: block
                        .get("is_error")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                    interrupted,
                    text,
                });
            }
            "text" => {
                let t = str_field(block, "text").trim();
                if !t.is_empty() && !is_system_text(t) {
                    text_parts.push(t);
                }
            }
            _ => {}
        }
    }
    if !text_parts.is_empty() {
        push(RecordKind::Text {
            role: Role::User,
            text: text_parts.join("\n"),
        });
    }
}

/// Tool result content is either a string or a list of text blocks.
fn result_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.as_str()),
                _ if block_type(item) == "text" => Some(str_field(item, "text")),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// All text in a message, for command-tag detection.
fn plain_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter(|b| block_type(b) == "text")
            .map(|b| str_field(b, "text"))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn is_system_text(t: &str) -> bool {
    SYSTEM_TAGS.iter().any(|tag| t.contains(tag))
}

fn between<'a>(s: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = s.find(open)? + open.len();
    let len = s[start..].find(close)?;
    Some(&s[start..start + len])
}

fn block_type(block: &Value) -> &str {
    str_field(block, "type")
}

fn str_field<'a>(v: &'a Value, key: &str) -> &'a str {
    v.get(key).and_then(Value::as_str).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kinds(line: Value) -> Vec<RecordKind> {
        Translator::new()
            .translate(&line)
            .into_iter()
            .map(|r| r.kind)
            .collect()
    }

    #[test]
    fn assistant_text_thinking_and_tool_use() {
        let line = json!({
            "type": "assistant",
            "timestamp": "2026-03-01T10:00:00Z",
            "message": {"content": [
                {"type": "thinking", "thinking": "hmm"},
                {"type": "text", "text": "Let me look."},
                {"type": "tool_use", "id": "toolu_1", "name": "Read", "input": {"file_path": "a.rs"}}
            ]}
        });
        let records = Translator::new().translate(&line);
        assert_eq!(records.len(), 3);
        assert!(records[0].timestamp.is_some());
        assert!(matches!(records[0].kind, RecordKind::Thinking { .. }));
        assert!(matches!(records[1].kind, RecordKind::Text { role: Role::Assistant, .. }));
        match &records[2].kind {
            RecordKind::Invocation {
                invocation_id,
                name,
                ..
            } => {
                assert_eq!(invocation_id, "toolu_1");
                assert_eq!(name, "Read");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn placeholder_and_empty_text_skipped() {
        let line = json!({"type": "assistant", "message": {"content": [
            {"type": "text", "text": "(no content)"},
            {"type": "text", "text": "  "}
        ]}});
        assert!(kinds(line).is_empty());
    }

    #[test]
    fn empty_thinking_without_text_is_placeholder() {
        let line = json!({"type": "assistant", "message": {"content": [
            {"type": "thinking", "thinking": ""}
        ]}});
        assert_eq!(
            kinds(line),
            vec![RecordKind::Thinking {
                text: "(thinking)".into()
            }]
        );
    }

    #[test]
    fn exit_plan_mode_emits_plan_first() {
        let line = json!({"type": "assistant", "message": {"content": [
            {"type": "tool_use", "id": "t", "name": "ExitPlanMode", "input": {"plan": "1. do it"}}
        ]}});
        let k = kinds(line);
        assert_eq!(k.len(), 2);
        assert_eq!(
            k[0],
            RecordKind::Text {
                role: Role::Assistant,
                text: "1. do it".into()
            }
        );
    }

    #[test]
    fn tool_result_blocks() {
        let line = json!({"type": "user", "message": {"content": [
            {"type": "tool_result", "tool_use_id": "t1", "content": [{"type": "text", "text": "out"}]},
            {"type": "tool_result", "tool_use_id": "t2", "content": "boom", "is_error": true},
            {"type": "tool_result", "tool_use_id": "t3", "content": INTERRUPTED_TEXT}
        ]}});
        let k = kinds(line);
        assert_eq!(k.len(), 3);
        assert_eq!(
            k[0],
            RecordKind::Result {
                invocation_id: "t1".into(),
                text: "out".into(),
                is_error: false,
                interrupted: false
            }
        );
        assert!(matches!(k[1], RecordKind::Result { is_error: true, .. }));
        assert!(matches!(k[2], RecordKind::Result { interrupted: true, .. }));
    }

    #[test]
    fn user_text_skips_system_tags() {
        let line = json!({"type": "user", "message": {"content": [
            {"type": "text", "text": "<system-reminder>x</system-reminder>"},
            {"type": "text", "text": "fix the bug"}
        ]}});
        assert_eq!(
            kinds(line),
            vec![RecordKind::Text {
                role: Role::User,
                text: "fix the bug".into()
            }]
        );
    }

    #[test]
    fn local_command_name_carries_to_stdout_line() {
        let mut t = Translator::new();
        let invoke = json!({"type": "user", "message": {"content":
            "<command-name>/cost</command-name><command-message>cost</command-message>"}});
        assert!(t.translate(&invoke).is_empty());

        let stdout = json!({"type": "user", "message": {"content":
            "<local-command-stdout>Total cost: $0.10</local-command-stdout>"}});
        let records = t.translate(&stdout);
        assert_eq!(
            records[0].kind,
            RecordKind::LocalCommand {
                name: Some("/cost".into()),
                output: "Total cost: $0.10".into()
            }
        );
    }

    #[test]
    fn other_line_types_translate_to_nothing() {
        assert!(kinds(json!({"type": "summary", "summary": "x"})).is_empty());
        assert!(kinds(json!({"type": "file-history-snapshot"})).is_empty());
        assert!(kinds(json!({"type": "user"})).is_empty());
    }
}
