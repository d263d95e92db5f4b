use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ─── Window ───────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Live,
    #[default]
    Dead,
}

impl Liveness {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Dead => "dead",
        }
    }
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One addressable terminal context as seen in the current tmux epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    /// Epoch-local id such as `@3`. Reused by tmux after a server restart.
    pub window_id: String,
    /// Stable across restarts; the only key that survives an epoch change.
    pub display_name: String,
    pub cwd: String,
    pub current_command: String,
    pub current_session_id: Option<String>,
    pub liveness: Liveness,
}

impl Window {
    pub fn key(&self) -> WindowKey {
        WindowKey {
            window_id: self.window_id.clone(),
            display_name: self.display_name.clone(),
        }
    }

    pub fn is_live(&self) -> bool {
        self.liveness == Liveness::Live
    }
}

/// Two-level window identity: epoch-local id plus stable display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowKey {
    pub window_id: String,
    pub display_name: String,
}

// ─── Topic ────────────────────────────────────────────────────────

/// A chat destination: recipient (chat/user) plus topic (thread) id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicKey {
    pub recipient: i64,
    pub topic: i64,
}

impl TopicKey {
    pub const fn new(recipient: i64, topic: i64) -> Self {
        Self { recipient, topic }
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.recipient, self.topic)
    }
}

impl FromStr for TopicKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (recipient, topic) = s
            .split_once(':')
            .ok_or_else(|| CoreError::InvalidTopicKey(s.to_string()))?;
        let recipient = recipient
            .trim()
            .parse()
            .map_err(|_| CoreError::InvalidTopicKey(s.to_string()))?;
        let topic = topic
            .trim()
            .parse()
            .map_err(|_| CoreError::InvalidTopicKey(s.to_string()))?;
        Ok(Self { recipient, topic })
    }
}

/// Where auto-registration sends windows nobody has attached yet.
///
/// `topic: None` means "create a fresh topic per window under this recipient".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTarget {
    pub recipient: i64,
    pub topic: Option<i64>,
}

impl FromStr for RouteTarget {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.contains(':') {
            let key: TopicKey = s.parse()?;
            return Ok(Self {
                recipient: key.recipient,
                topic: Some(key.topic),
            });
        }
        let recipient = s
            .parse()
            .map_err(|_| CoreError::InvalidRoute(s.to_string()))?;
        Ok(Self {
            recipient,
            topic: None,
        })
    }
}

// ─── Session Association ──────────────────────────────────────────

/// Hook-written association of a live window to the session running in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAssociation {
    pub window_id: String,
    pub session_id: String,
    pub cwd: String,
    pub display_name: String,
    pub transcript_path: Option<String>,
}

// ─── Records ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One structured event decoded from a transcript line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordKind {
    Text {
        role: Role,
        text: String,
    },
    Thinking {
        text: String,
    },
    Invocation {
        invocation_id: String,
        name: String,
        input: serde_json::Value,
    },
    Result {
        invocation_id: String,
        text: String,
        is_error: bool,
        interrupted: bool,
    },
    LocalCommand {
        name: Option<String>,
        output: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub kind: RecordKind,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Record {
    pub fn new(kind: RecordKind) -> Self {
        Self {
            kind,
            timestamp: None,
        }
    }

    pub fn at(kind: RecordKind, timestamp: Option<DateTime<Utc>>) -> Self {
        Self { kind, timestamp }
    }
}

// ─── Notification ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Text,
    Thinking,
    LocalCommand,
    Invocation,
    Result,
    Prompt,
    Error,
}

impl ContentKind {
    /// Only plain prose may be concatenated with a neighbour in the queue.
    pub fn is_plain(self) -> bool {
        matches!(self, Self::Text | Self::Thinking | Self::LocalCommand)
    }
}

/// Identity of an emitted invocation notification, used as an edit target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationRef {
    pub session_id: String,
    pub invocation_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DeliveryMode {
    New,
    EditOf { target: NotificationRef },
}

/// A delivery-ready unit produced by the reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub session_id: String,
    pub content: ContentKind,
    pub role: Role,
    pub text: String,
    pub invocation_id: Option<String>,
    pub tool_name: Option<String>,
    pub mode: DeliveryMode,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn is_edit(&self) -> bool {
        matches!(self.mode, DeliveryMode::EditOf { .. })
    }

    pub fn is_mergeable(&self) -> bool {
        self.content.is_plain() && !self.is_edit()
    }

    /// Build a visible error notification, e.g. after a persistent send failure.
    pub fn error(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            content: ContentKind::Error,
            role: Role::Assistant,
            text: text.into(),
            invocation_id: None,
            tool_name: None,
            mode: DeliveryMode::New,
            timestamp: None,
        }
    }
}

// ─── Error ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    InvalidTopicKey(String),
    InvalidRoute(String),
    UnknownLateResultPolicy(String),
    WindowAlreadyBound { window_id: String, topic: TopicKey },
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTopicKey(s) => write!(f, "invalid topic key: {s:?} (want <recipient>:<topic>)"),
            Self::InvalidRoute(s) => write!(f, "invalid route: {s:?} (want <recipient>[:<topic>])"),
            Self::UnknownLateResultPolicy(s) => write!(f, "unknown late result policy: {s}"),
            Self::WindowAlreadyBound { window_id, topic } => {
                write!(f, "window {window_id} already bound to topic {topic}")
            }
        }
    }
}

impl std::error::Error for CoreError {}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_key_display_and_parse() {
        let key = TopicKey::new(-1001234, 42);
        let s = key.to_string();
        assert_eq!(s, "-1001234:42");
        assert_eq!(s.parse::<TopicKey>().expect("parse"), key);
    }

    #[test]
    fn topic_key_rejects_garbage() {
        assert!("42".parse::<TopicKey>().is_err());
        assert!("a:b".parse::<TopicKey>().is_err());
    }

    #[test]
    fn route_target_with_and_without_topic() {
        let r: RouteTarget = "77".parse().expect("parse");
        assert_eq!(r.recipient, 77);
        assert_eq!(r.topic, None);

        let r: RouteTarget = "77:5".parse().expect("parse");
        assert_eq!(r.topic, Some(5));

        assert!("x".parse::<RouteTarget>().is_err());
    }

    #[test]
    fn liveness_default_is_dead() {
        assert_eq!(Liveness::default(), Liveness::Dead);
    }

    #[test]
    fn plain_content_is_mergeable_edits_are_not() {
        let mut n = Notification::error("s", "boom");
        assert!(!n.is_mergeable());

        n.content = ContentKind::Text;
        assert!(n.is_mergeable());

        n.mode = DeliveryMode::EditOf {
            target: NotificationRef {
                session_id: "s".into(),
                invocation_id: "t".into(),
            },
        };
        assert!(!n.is_mergeable());
    }

    #[test]
    fn record_kind_serde_tagged() {
        let kind = RecordKind::Result {
            invocation_id: "tool-1".into(),
            text: "ok".into(),
            is_error: false,
            interrupted: false,
        };
        let json = serde_json::to_value(&kind).expect("serialize");
        assert_eq!(json["kind"], "result");
        let back: RecordKind = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, kind);
    }
}
