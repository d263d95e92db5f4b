//! Per-recipient delivery queue: FIFO with merge and rate-limit rules.
//!
//! The queue itself does no IO and never sleeps. A worker asks
//! [`DeliveryQueue::ready_at`] when it may send next, takes one
//! [`DeliveryUnit`] with [`DeliveryQueue::pop_unit`], hands it to the
//! transport, and reports back with [`DeliveryQueue::mark_sent`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use topicmux_core::types::{ContentKind, Notification, NotificationRef, TopicKey};

/// Transport-assigned id of a sent message.
pub type MessageId = i64;

pub const DEFAULT_MIN_SEND_INTERVAL: Duration = Duration::from_millis(1100);
/// Kept below the transport's 4096 hard limit to leave room for rendering.
pub const DEFAULT_MERGE_CEILING: usize = 3800;
pub const MERGE_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePolicy {
    pub min_interval: Duration,
    pub merge_ceiling: usize,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            min_interval: DEFAULT_MIN_SEND_INTERVAL,
            merge_ceiling: DEFAULT_MERGE_CEILING,
        }
    }
}

/// One notification routed to a topic.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedItem {
    pub topic: TopicKey,
    pub notification: Notification,
    /// Transcript offset the notification was read at, for last-read tracking.
    pub source_offset: Option<u64>,
}

impl QueuedItem {
    pub fn new(topic: TopicKey, notification: Notification, source_offset: Option<u64>) -> Self {
        Self {
            topic,
            notification,
            source_offset,
        }
    }
}

/// What a worker sends in one transport call: a single item, or several
/// plain-text items concatenated.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryUnit {
    pub topic: TopicKey,
    pub notification: Notification,
    pub source_offset: Option<u64>,
    pub merged: usize,
}

#[derive(Debug)]
pub struct DeliveryQueue {
    recipient: i64,
    policy: QueuePolicy,
    items: VecDeque<QueuedItem>,
    last_sent_at: Option<Instant>,
    closed: HashSet<TopicKey>,
}

impl DeliveryQueue {
    pub fn new(recipient: i64, policy: QueuePolicy) -> Self {
        Self {
            recipient,
            policy,
            items: VecDeque::new(),
            last_sent_at: None,
            closed: HashSet::new(),
        }
    }

    pub fn recipient(&self) -> i64 {
        self.recipient
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append an item. Items for a closed topic are refused.
    pub fn enqueue(&mut self, item: QueuedItem) -> bool {
        if self.closed.contains(&item.topic) {
            return false;
        }
        self.items.push_back(item);
        true
    }

    /// Earliest instant the next send is allowed. `None` means immediately.
    pub fn ready_at(&self) -> Option<Instant> {
        self.last_sent_at.map(|t| t + self.policy.min_interval)
    }

    /// Time left before the next send is allowed.
    pub fn wait_time(&self, now: Instant) -> Duration {
        self.ready_at()
            .map(|at| at.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    /// Take the head of the queue, merging following plain-text items of the
    /// same kind for the same topic while the combined text stays within the
    /// ceiling.
    pub fn pop_unit(&mut self) -> Option<DeliveryUnit> {
        let head = self.items.pop_front()?;
        let mut unit = DeliveryUnit {
            topic: head.topic,
            notification: head.notification,
            source_offset: head.source_offset,
            merged: 1,
        };
        if !unit.notification.is_mergeable() {
            return Some(unit);
        }

        let mut len = unit.notification.text.chars().count();
        let sep = MERGE_SEPARATOR.chars().count();
        while let Some(next) = self.items.front() {
            if next.topic != unit.topic
                || !next.notification.is_mergeable()
                || next.notification.content != unit.notification.content
                || next.notification.role != unit.notification.role
            {
                break;
            }
            let next_len = next.notification.text.chars().count();
            if len + sep + next_len > self.policy.merge_ceiling {
                break;
            }
            let Some(next) = self.items.pop_front() else {
                break;
            };
            unit.notification.text.push_str(MERGE_SEPARATOR);
            unit.notification.text.push_str(&next.notification.text);
            unit.source_offset = max_offset(unit.source_offset, next.source_offset);
            unit.merged += 1;
            len += sep + next_len;
        }
        Some(unit)
    }

    pub fn mark_sent(&mut self, at: Instant) {
        self.last_sent_at = Some(at);
    }

    /// Drop queued items for `topic` and refuse new ones until reopened.
    /// Returns the number of items dropped.
    pub fn cancel_topic(&mut self, topic: TopicKey) -> usize {
        self.closed.insert(topic);
        let before = self.items.len();
        self.items.retain(|i| i.topic != topic);
        before - self.items.len()
    }

    pub fn reopen_topic(&mut self, topic: TopicKey) {
        self.closed.remove(&topic);
    }

    pub fn is_closed(&self, topic: TopicKey) -> bool {
        self.closed.contains(&topic)
    }
}

fn max_offset(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

// ─── Sent references ──────────────────────────────────────────────

/// Message ids of sent invocation notifications, so a later result can edit
/// the message in place.
#[derive(Debug, Default)]
pub struct SentRefs {
    refs: HashMap<NotificationRef, (TopicKey, MessageId)>,
}

impl SentRefs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember `message_id` if `notification` can be the target of an edit.
    pub fn record(&mut self, topic: TopicKey, notification: &Notification, message_id: MessageId) {
        if !matches!(notification.content, ContentKind::Invocation | ContentKind::Prompt) {
            return;
        }
        if let Some(invocation_id) = &notification.invocation_id {
            self.refs.insert(
                NotificationRef {
                    session_id: notification.session_id.clone(),
                    invocation_id: invocation_id.clone(),
                },
                (topic, message_id),
            );
        }
    }

    /// Consume the message id for an edit target, if it was sent to `topic`.
    pub fn take(&mut self, topic: TopicKey, target: &NotificationRef) -> Option<MessageId> {
        match self.refs.get(target) {
            Some((t, _)) if *t == topic => self.refs.remove(target).map(|(_, id)| id),
            _ => None,
        }
    }

    pub fn forget_topic(&mut self, topic: TopicKey) {
        self.refs.retain(|_, (t, _)| *t != topic);
    }

    pub fn forget_session(&mut self, session_id: &str) {
        self.refs.retain(|r, _| r.session_id != session_id);
    }

    /// Drop edit targets of invocations whose result will never pair.
    pub fn forget_invocations(&mut self, session_id: &str, invocation_ids: &[String]) {
        self.refs.retain(|r, _| {
            r.session_id != session_id || !invocation_ids.contains(&r.invocation_id)
        });
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use topicmux_core::types::{DeliveryMode, Role};

    const TOPIC: TopicKey = TopicKey {
        recipient: 1,
        topic: 10,
    };

    fn text(s: &str) -> Notification {
        Notification {
            session_id: "s".into(),
            content: ContentKind::Text,
            role: Role::Assistant,
            text: s.into(),
            invocation_id: None,
            tool_name: None,
            mode: DeliveryMode::New,
            timestamp: None,
        }
    }

    fn invocation(id: &str) -> Notification {
        Notification {
            content: ContentKind::Invocation,
            invocation_id: Some(id.into()),
            tool_name: Some("Bash".into()),
            ..text(&format!("Bash({id})"))
        }
    }

    fn edit_of(id: &str) -> Notification {
        Notification {
            content: ContentKind::Result,
            invocation_id: Some(id.into()),
            mode: DeliveryMode::EditOf {
                target: NotificationRef {
                    session_id: "s".into(),
                    invocation_id: id.into(),
                },
            },
            ..text("  ⎿  Done")
        }
    }

    fn queue(ceiling: usize) -> DeliveryQueue {
        DeliveryQueue::new(
            1,
            QueuePolicy {
                merge_ceiling: ceiling,
                ..QueuePolicy::default()
            },
        )
    }

    #[test]
    fn fifo_order_without_merge() {
        let mut q = queue(100);
        q.enqueue(QueuedItem::new(TOPIC, invocation("a"), Some(1)));
        q.enqueue(QueuedItem::new(TOPIC, edit_of("a"), Some(2)));
        q.enqueue(QueuedItem::new(TOPIC, invocation("b"), Some(3)));

        let order: Vec<Option<u64>> = std::iter::from_fn(|| q.pop_unit()).map(|u| u.source_offset).collect();
        assert_eq!(order, vec![Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn rate_limit_spaces_sends() {
        let mut q = queue(100);
        for id in ["a", "b", "c"] {
            q.enqueue(QueuedItem::new(TOPIC, invocation(id), None));
        }

        let t0 = Instant::now();
        let mut clock = t0;
        let mut sent_at = Vec::new();
        while let Some(unit) = q.pop_unit() {
            clock += q.wait_time(clock);
            sent_at.push((clock - t0, unit.notification.invocation_id));
            q.mark_sent(clock);
        }

        assert_eq!(sent_at[0].0, Duration::ZERO);
        assert!(sent_at[1].0 >= Duration::from_millis(1100));
        assert!(sent_at[2].0 >= Duration::from_millis(2200));
        let ids: Vec<_> = sent_at.into_iter().filter_map(|(_, id)| id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn merge_stops_at_ceiling() {
        let mut q = queue(10);
        q.enqueue(QueuedItem::new(TOPIC, text("abc"), Some(1)));
        q.enqueue(QueuedItem::new(TOPIC, text("def"), Some(2)));
        q.enqueue(QueuedItem::new(TOPIC, text("ghijk"), Some(3)));

        let first = q.pop_unit().expect("test");
        assert_eq!(first.notification.text, "abc\n\ndef");
        assert_eq!(first.merged, 2);
        assert_eq!(first.source_offset, Some(2));

        let second = q.pop_unit().expect("test");
        assert_eq!(second.notification.text, "ghijk");
        assert!(q.is_empty());
    }

    #[test]
    fn structured_content_and_other_topics_break_merge() {
        let other = TopicKey::new(1, 11);
        let mut q = queue(1000);
        q.enqueue(QueuedItem::new(TOPIC, text("one"), None));
        q.enqueue(QueuedItem::new(other, text("elsewhere"), None));
        q.enqueue(QueuedItem::new(TOPIC, text("two"), None));
        q.enqueue(QueuedItem::new(TOPIC, invocation("x"), None));
        q.enqueue(QueuedItem::new(TOPIC, text("three"), None));

        let texts: Vec<String> = std::iter::from_fn(|| q.pop_unit())
            .map(|u| u.notification.text)
            .collect();
        assert_eq!(texts, vec!["one", "elsewhere", "two", "Bash(x)", "three"]);
    }

    #[test]
    fn user_and_assistant_text_stay_apart() {
        let mut q = queue(1000);
        q.enqueue(QueuedItem::new(TOPIC, text("answer"), None));
        q.enqueue(QueuedItem::new(
            TOPIC,
            Notification {
                role: Role::User,
                ..text("question")
            },
            None,
        ));
        assert_eq!(q.pop_unit().expect("test").merged, 1);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn edits_are_never_merged() {
        let mut q = queue(1000);
        q.enqueue(QueuedItem::new(TOPIC, edit_of("a"), None));
        q.enqueue(QueuedItem::new(TOPIC, text("after"), None));
        assert_eq!(q.pop_unit().expect("test").merged, 1);
    }

    #[test]
    fn cancel_topic_drops_and_refuses() {
        let other = TopicKey::new(1, 11);
        let mut q = queue(1000);
        q.enqueue(QueuedItem::new(TOPIC, text("a"), None));
        q.enqueue(QueuedItem::new(other, text("b"), None));

        assert_eq!(q.cancel_topic(TOPIC), 1);
        assert!(q.is_closed(TOPIC));
        assert!(!q.enqueue(QueuedItem::new(TOPIC, text("c"), None)));
        assert_eq!(q.len(), 1);

        q.reopen_topic(TOPIC);
        assert!(!q.is_closed(TOPIC));
        assert!(q.enqueue(QueuedItem::new(TOPIC, text("d"), None)));
    }

    #[test]
    fn sent_refs_resolve_edit_targets() {
        let mut refs = SentRefs::new();
        refs.record(TOPIC, &invocation("a"), 77);
        refs.record(TOPIC, &text("plain"), 78);
        assert_eq!(refs.len(), 1);

        let target = NotificationRef {
            session_id: "s".into(),
            invocation_id: "a".into(),
        };
        assert_eq!(refs.take(TopicKey::new(1, 11), &target), None);
        assert_eq!(refs.take(TOPIC, &target), Some(77));
        assert_eq!(refs.take(TOPIC, &target), None);

        refs.record(TOPIC, &invocation("b"), 79);
        refs.forget_topic(TOPIC);
        assert!(refs.is_empty());
    }

    #[test]
    fn sent_refs_forget_evicted_invocations() {
        let mut refs = SentRefs::new();
        refs.record(TOPIC, &invocation("slow"), 80);
        refs.record(TOPIC, &invocation("fast"), 81);
        let other_session = Notification {
            session_id: "t".into(),
            ..invocation("slow")
        };
        refs.record(TOPIC, &other_session, 82);

        refs.forget_invocations("s", &["slow".to_string()]);
        assert_eq!(refs.len(), 2);
        let target = |session: &str, id: &str| NotificationRef {
            session_id: session.into(),
            invocation_id: id.into(),
        };
        assert_eq!(refs.take(TOPIC, &target("s", "slow")), None);
        assert_eq!(refs.take(TOPIC, &target("s", "fast")), Some(81));
        assert_eq!(refs.take(TOPIC, &target("t", "slow")), Some(82));
    }
}
