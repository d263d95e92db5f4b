//! Chat transport boundary.
//!
//! The daemon talks to a chat platform only through [`Transport`]. The one
//! built-in adapter, [`NdjsonTransport`], writes each operation as a JSON line
//! to stdout or an outbox file so an external bridge process can forward it.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;
use thiserror::Error;

use topicmux_core::types::{ContentKind, Notification, Role, TopicKey};
use topicmux_daemon::delivery::MessageId;

/// Hard per-message limit; longer texts are split before sending.
pub const TRANSPORT_TEXT_LIMIT: usize = 4096;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode outbound message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("transport rejected message: {0}")]
    Rejected(String),
}

/// Send and edit messages in chat topics. Calls block; async callers use
/// `spawn_blocking`.
pub trait Transport: Send + Sync {
    /// Send `text` as a new message and return the id of its first part.
    fn send(&self, topic: TopicKey, text: &str) -> Result<MessageId, TransportError>;

    /// Replace the text of a sent message.
    fn edit(&self, topic: TopicKey, message_id: MessageId, text: &str) -> Result<(), TransportError>;

    fn delete(&self, topic: TopicKey, message_id: MessageId) -> Result<(), TransportError>;

    /// Create a topic under `recipient` and return its id.
    fn create_topic(&self, recipient: i64, name: &str) -> Result<i64, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, topic: TopicKey, text: &str) -> Result<MessageId, TransportError> {
        (**self).send(topic, text)
    }

    fn edit(&self, topic: TopicKey, message_id: MessageId, text: &str) -> Result<(), TransportError> {
        (**self).edit(topic, message_id, text)
    }

    fn delete(&self, topic: TopicKey, message_id: MessageId) -> Result<(), TransportError> {
        (**self).delete(topic, message_id)
    }

    fn create_topic(&self, recipient: i64, name: &str) -> Result<i64, TransportError> {
        (**self).create_topic(recipient, name)
    }
}

/// Run a blocking transport call off the async threads.
pub async fn run_blocking<R, F>(transport: &Arc<dyn Transport>, f: F) -> Result<R, TransportError>
where
    R: Send + 'static,
    F: FnOnce(&dyn Transport) -> Result<R, TransportError> + Send + 'static,
{
    let transport = Arc::clone(transport);
    tokio::task::spawn_blocking(move || f(&*transport))
        .await
        .map_err(|e| TransportError::Rejected(format!("transport task failed: {e}")))?
}

// ─── Rendering ────────────────────────────────────────────────────

/// Plain-text rendering of a notification.
///
/// `degraded` drops every decoration and is used for the retry after a
/// failed send.
pub fn render(n: &Notification, degraded: bool) -> String {
    if degraded {
        return n.text.clone();
    }
    match (n.content, n.role) {
        (ContentKind::Text, Role::User) => format!("👤 {}", n.text),
        (ContentKind::Thinking, _) => format!("∴ Thinking…\n{}", n.text),
        (ContentKind::Prompt, _) => format!("❓ {}", n.text),
        (ContentKind::Error, _) => format!("⚠️ {}", n.text),
        _ => n.text.clone(),
    }
}

/// Split `text` into parts of at most `limit` characters, breaking at line
/// boundaries where possible.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    if text.chars().count() <= limit {
        return vec![text.to_string()];
    }

    let mut parts = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split('\n') {
        let line_len = line.chars().count();
        let needed = if current.is_empty() { line_len } else { current_len + 1 + line_len };
        if needed <= limit {
            if !current.is_empty() {
                current.push('\n');
                current_len += 1;
            }
            current.push_str(line);
            current_len += line_len;
            continue;
        }

        if !current.is_empty() {
            parts.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len <= limit {
            current.push_str(line);
            current_len = line_len;
            continue;
        }
        let chars: Vec<char> = line.chars().collect();
        for chunk in chars.chunks(limit) {
            parts.push(chunk.iter().collect());
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

// ─── NDJSON adapter ───────────────────────────────────────────────

pub struct NdjsonTransport {
    out: Mutex<Box<dyn Write + Send>>,
    next_message: AtomicI64,
    next_topic: AtomicI64,
}

impl NdjsonTransport {
    pub fn from_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
            next_message: AtomicI64::new(1),
            // Topic ids outlive the process in bindings.json, so seed from the
            // clock rather than restarting at 1.
            next_topic: AtomicI64::new(chrono::Utc::now().timestamp_millis()),
        }
    }

    pub fn stdout() -> Self {
        Self::from_writer(Box::new(std::io::stdout()))
    }

    /// Append to `path`, creating it if needed.
    pub fn open(path: &Path) -> Result<Self, TransportError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::from_writer(Box::new(file)))
    }

    fn emit(&self, event: &serde_json::Value) -> Result<(), TransportError> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        let mut out = self
            .out
            .lock()
            .map_err(|_| TransportError::Rejected("outbox writer poisoned".to_string()))?;
        out.write_all(line.as_bytes())?;
        out.flush()?;
        Ok(())
    }

    fn send_parts(&self, topic: TopicKey, parts: &[String]) -> Result<Option<MessageId>, TransportError> {
        let mut first = None;
        for part in parts {
            let id = self.next_message.fetch_add(1, Ordering::Relaxed);
            self.emit(&json!({
                "op": "send",
                "recipient": topic.recipient,
                "topic": topic.topic,
                "message_id": id,
                "text": part,
            }))?;
            first.get_or_insert(id);
        }
        Ok(first)
    }
}

impl Transport for NdjsonTransport {
    fn send(&self, topic: TopicKey, text: &str) -> Result<MessageId, TransportError> {
        let parts = split_message(text, TRANSPORT_TEXT_LIMIT);
        self.send_parts(topic, &parts)?
            .ok_or_else(|| TransportError::Rejected("empty message".to_string()))
    }

    fn edit(&self, topic: TopicKey, message_id: MessageId, text: &str) -> Result<(), TransportError> {
        let parts = split_message(text, TRANSPORT_TEXT_LIMIT);
        let Some((head, rest)) = parts.split_first() else {
            return Ok(());
        };
        self.emit(&json!({
            "op": "edit",
            "recipient": topic.recipient,
            "topic": topic.topic,
            "message_id": message_id,
            "text": head,
        }))?;
        self.send_parts(topic, rest)?;
        Ok(())
    }

    fn delete(&self, topic: TopicKey, message_id: MessageId) -> Result<(), TransportError> {
        self.emit(&json!({
            "op": "delete",
            "recipient": topic.recipient,
            "topic": topic.topic,
            "message_id": message_id,
        }))
    }

    fn create_topic(&self, recipient: i64, name: &str) -> Result<i64, TransportError> {
        let topic = self.next_topic.fetch_add(1, Ordering::Relaxed);
        self.emit(&json!({
            "op": "create_topic",
            "recipient": recipient,
            "topic": topic,
            "name": name,
        }))?;
        Ok(topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().expect("test").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn lines(&self) -> Vec<serde_json::Value> {
            let bytes = self.0.lock().expect("test").clone();
            String::from_utf8(bytes)
                .expect("test")
                .lines()
                .map(|l| serde_json::from_str(l).expect("test"))
                .collect()
        }
    }

    const T: TopicKey = TopicKey::new(5, 9);

    #[test]
    fn short_text_is_one_part() {
        assert_eq!(split_message("hello", 10), vec!["hello"]);
    }

    #[test]
    fn split_prefers_line_boundaries() {
        let parts = split_message("aaaa\nbbbb\ncccc", 9);
        assert_eq!(parts, vec!["aaaa\nbbbb", "cccc"]);
        assert!(parts.iter().all(|p| p.chars().count() <= 9));
    }

    #[test]
    fn overlong_line_is_hard_split() {
        let parts = split_message("abcdefghij", 4);
        assert_eq!(parts, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn split_counts_chars_not_bytes() {
        let text = "é".repeat(10);
        let parts = split_message(&text, 5);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].chars().count(), 5);
    }

    #[test]
    fn ndjson_send_edit_delete() {
        let buf = SharedBuf::default();
        let t = NdjsonTransport::from_writer(Box::new(buf.clone()));
        let id = t.send(T, "hi").expect("test");
        t.edit(T, id, "hi again").expect("test");
        t.delete(T, id).expect("test");

        let lines = buf.lines();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["op"], "send");
        assert_eq!(lines[0]["recipient"], 5);
        assert_eq!(lines[0]["topic"], 9);
        assert_eq!(lines[1]["op"], "edit");
        assert_eq!(lines[1]["message_id"], id);
        assert_eq!(lines[2]["op"], "delete");
    }

    #[test]
    fn long_send_is_split_and_returns_first_id() {
        let buf = SharedBuf::default();
        let t = NdjsonTransport::from_writer(Box::new(buf.clone()));
        let text = "x".repeat(TRANSPORT_TEXT_LIMIT + 10);
        let id = t.send(T, &text).expect("test");
        let lines = buf.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["message_id"], id);
        assert!(lines[1]["message_id"].as_i64().expect("test") > id);
    }

    #[test]
    fn created_topics_are_distinct() {
        let t = NdjsonTransport::from_writer(Box::new(SharedBuf::default()));
        let a = t.create_topic(5, "alpha").expect("test");
        let b = t.create_topic(5, "beta").expect("test");
        assert_ne!(a, b);
    }

    #[test]
    fn degraded_render_is_raw_text() {
        let n = Notification::error("s", "send failed");
        assert_eq!(render(&n, false), "⚠️ send failed");
        assert_eq!(render(&n, true), "send failed");
    }
}
