//! Event Reconciler: per-session invocation/result pairing.
//!
//! The reconciler owns the pending-invocation table for one session. It is
//! fed the records of each poll and yields notifications lazily, in
//! transcript order. Pending entries survive between polls so an invocation
//! read in one poll pairs with a result read in a later one.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::summary;
use crate::types::{
    ContentKind, CoreError, DeliveryMode, Notification, NotificationRef, Record, RecordKind, Role,
};

/// Default lifetime of an unanswered invocation.
pub const DEFAULT_PENDING_TIMEOUT_SECS: i64 = 3600;

// ─── Policy ───────────────────────────────────────────────────────

/// What to do with a result whose invocation was already evicted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LateResultPolicy {
    #[default]
    Standalone,
    Drop,
}

impl fmt::Display for LateResultPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Standalone => "standalone",
            Self::Drop => "drop",
        })
    }
}

impl FromStr for LateResultPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standalone" => Ok(Self::Standalone),
            "drop" => Ok(Self::Drop),
            other => Err(CoreError::UnknownLateResultPolicy(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingPolicy {
    pub timeout: TimeDelta,
    pub late_results: LateResultPolicy,
}

impl Default for PendingPolicy {
    fn default() -> Self {
        Self {
            timeout: TimeDelta::seconds(DEFAULT_PENDING_TIMEOUT_SECS),
            late_results: LateResultPolicy::Standalone,
        }
    }
}

// ─── Pending Invocation ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct PendingInvocation {
    pub invocation_id: String,
    pub tool_name: String,
    pub summary: String,
    pub input: Value,
    pub origin: NotificationRef,
    pub created_at: DateTime<Utc>,
}

// ─── Reconciler ───────────────────────────────────────────────────

#[derive(Debug)]
pub struct Reconciler {
    session_id: String,
    policy: PendingPolicy,
    pending: HashMap<String, PendingInvocation>,
    /// Ids evicted by timeout, kept for one more timeout window so the late
    /// result policy can recognise them.
    evicted: HashMap<String, DateTime<Utc>>,
}

impl Reconciler {
    pub fn new(session_id: impl Into<String>, policy: PendingPolicy) -> Self {
        Self {
            session_id: session_id.into(),
            policy,
            pending: HashMap::new(),
            evicted: HashMap::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Lazily turn `records` into notifications.
    ///
    /// Records are applied one at a time as the iterator is advanced; any
    /// record not yet pulled has not touched the pending table.
    pub fn reconcile<I>(&mut self, records: I, now: DateTime<Utc>) -> Reconcile<'_, I::IntoIter>
    where
        I: IntoIterator<Item = Record>,
    {
        Reconcile {
            reconciler: self,
            records: records.into_iter(),
            now,
        }
    }

    /// Apply one record. Returns the notification it produces, if any.
    pub fn apply(&mut self, record: Record, now: DateTime<Utc>) -> Option<Notification> {
        let timestamp = record.timestamp;
        match record.kind {
            RecordKind::Text { role, text } => {
                if text.trim().is_empty() {
                    return None;
                }
                Some(self.notification(ContentKind::Text, role, text, timestamp))
            }
            RecordKind::Thinking { text } => {
                Some(self.notification(ContentKind::Thinking, Role::Assistant, text, timestamp))
            }
            RecordKind::LocalCommand { name, output } => {
                let text = match (name, output.trim().is_empty()) {
                    (Some(n), true) => format!("❯ {n}"),
                    (Some(n), false) => format!("❯ {n}\n  ⎿  {}", output.trim_end()),
                    (None, _) => output,
                };
                Some(self.notification(ContentKind::LocalCommand, Role::User, text, timestamp))
            }
            RecordKind::Invocation {
                invocation_id,
                name,
                input,
            } => Some(self.start_invocation(invocation_id, name, input, now, timestamp)),
            RecordKind::Result {
                invocation_id,
                text,
                is_error,
                interrupted,
            } => self.finish_invocation(invocation_id, &text, is_error, interrupted, timestamp),
        }
    }

    fn start_invocation(
        &mut self,
        invocation_id: String,
        name: String,
        input: Value,
        now: DateTime<Utc>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Notification {
        let summary_line = summary::invocation_summary(&name, &input);
        let content = if summary::is_interactive(&name) {
            ContentKind::Prompt
        } else {
            ContentKind::Invocation
        };

        let mut n = self.notification(content, Role::Assistant, summary_line.clone(), timestamp);
        n.tool_name = Some(name.clone());

        if !invocation_id.is_empty() {
            n.invocation_id = Some(invocation_id.clone());
            self.evicted.remove(&invocation_id);
            self.pending.insert(
                invocation_id.clone(),
                PendingInvocation {
                    origin: NotificationRef {
                        session_id: self.session_id.clone(),
                        invocation_id: invocation_id.clone(),
                    },
                    invocation_id,
                    tool_name: name,
                    summary: summary_line,
                    input,
                    created_at: now,
                },
            );
        }
        n
    }

    fn finish_invocation(
        &mut self,
        invocation_id: String,
        text: &str,
        is_error: bool,
        interrupted: bool,
        timestamp: Option<DateTime<Utc>>,
    ) -> Option<Notification> {
        if let Some(p) = self.pending.remove(&invocation_id) {
            let body = summary::result_text(
                Some(&p.summary),
                Some(&p.tool_name),
                Some(&p.input),
                text,
                is_error,
                interrupted,
            );
            let mut n = self.notification(ContentKind::Result, Role::Assistant, body, timestamp);
            n.invocation_id = Some(invocation_id);
            n.tool_name = Some(p.tool_name);
            n.mode = DeliveryMode::EditOf { target: p.origin };
            return Some(n);
        }

        if self.policy.late_results == LateResultPolicy::Drop
            && self.evicted.remove(&invocation_id).is_some()
        {
            return None;
        }

        let body = summary::result_text(None, None, None, text, is_error, interrupted);
        let mut n = self.notification(ContentKind::Result, Role::Assistant, body, timestamp);
        if !invocation_id.is_empty() {
            n.invocation_id = Some(invocation_id);
        }
        Some(n)
    }

    fn notification(
        &self,
        content: ContentKind,
        role: Role,
        text: String,
        timestamp: Option<DateTime<Utc>>,
    ) -> Notification {
        Notification {
            session_id: self.session_id.clone(),
            content,
            role,
            text,
            invocation_id: None,
            tool_name: None,
            mode: DeliveryMode::New,
            timestamp,
        }
    }

    /// Drop pending entries older than the policy timeout. Returns the
    /// evicted invocation ids.
    pub fn evict_expired(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let timeout = self.policy.timeout;
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| now - p.created_at >= timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.pending.remove(id);
            self.evicted.insert(id.clone(), now);
        }
        self.evicted.retain(|_, at| now - *at < timeout);
        expired
    }

    /// Forget all cross-poll state, e.g. when the session's topic is closed.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.evicted.clear();
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, invocation_id: &str) -> bool {
        self.pending.contains_key(invocation_id)
    }

    pub fn pending(&self, invocation_id: &str) -> Option<&PendingInvocation> {
        self.pending.get(invocation_id)
    }

}

// ─── Lazy iterator ────────────────────────────────────────────────

pub struct Reconcile<'a, I> {
    reconciler: &'a mut Reconciler,
    records: I,
    now: DateTime<Utc>,
}

impl<I: Iterator<Item = Record>> Iterator for Reconcile<'_, I> {
    type Item = Notification;

    fn next(&mut self) -> Option<Notification> {
        loop {
            let record = self.records.next()?;
            if let Some(n) = self.reconciler.apply(record, self.now) {
                return Some(n);
            }
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────
