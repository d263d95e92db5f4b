//! Latest-value status board, one slot per topic.
//!
//! Status lines are ephemeral and never queued: publishing twice before the
//! sender drains keeps only the second value.

use std::collections::{BTreeMap, HashMap};

use topicmux_core::types::TopicKey;

use crate::delivery::MessageId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    Set(String),
    Clear,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingStatus {
    pub topic: TopicKey,
    pub update: StatusUpdate,
    /// The status message already on screen for this topic, to edit or delete.
    pub message_id: Option<MessageId>,
}

#[derive(Debug, Default)]
pub struct StatusBoard {
    /// Last value delivered per topic.
    shown: HashMap<TopicKey, (String, Option<MessageId>)>,
    pending: BTreeMap<TopicKey, StatusUpdate>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current status for `topic`. `None` means no status line is
    /// visible. Returns whether an update is now pending.
    pub fn publish(&mut self, topic: TopicKey, status: Option<String>) -> bool {
        let shown = self.shown.get(&topic).map(|(s, _)| s.as_str());
        let update = match (status, shown) {
            (Some(s), Some(prev)) if s == prev => None,
            (Some(s), _) => Some(StatusUpdate::Set(s)),
            (None, Some(_)) => Some(StatusUpdate::Clear),
            (None, None) => None,
        };
        match update {
            Some(u) => {
                self.pending.insert(topic, u);
                true
            }
            None => {
                self.pending.remove(&topic);
                false
            }
        }
    }

    /// Drain pending updates in topic order.
    pub fn take_pending(&mut self) -> Vec<PendingStatus> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .map(|(topic, update)| PendingStatus {
                topic,
                message_id: self.shown.get(&topic).and_then(|(_, id)| *id),
                update,
            })
            .collect()
    }

    /// Record that `update` reached the transport as `message_id`.
    pub fn confirm(&mut self, topic: TopicKey, update: &StatusUpdate, message_id: Option<MessageId>) {
        match update {
            StatusUpdate::Set(s) => {
                self.shown.insert(topic, (s.clone(), message_id));
            }
            StatusUpdate::Clear => {
                self.shown.remove(&topic);
            }
        }
    }

    /// Forget a topic entirely (closed or unbound).
    pub fn remove_topic(&mut self, topic: TopicKey) -> Option<MessageId> {
        self.pending.remove(&topic);
        self.shown.remove(&topic).and_then(|(_, id)| id)
    }

    pub fn shown(&self, topic: TopicKey) -> Option<&str> {
        self.shown.get(&topic).map(|(s, _)| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: TopicKey = TopicKey::new(1, 10);

    #[test]
    fn latest_value_supersedes() {
        let mut b = StatusBoard::new();
        assert!(b.publish(T, Some("Reading…".into())));
        assert!(b.publish(T, Some("Writing…".into())));
        let p = b.take_pending();
        assert_eq!(p.len(), 1);
        assert_eq!(p[0].update, StatusUpdate::Set("Writing…".into()));
        assert_eq!(p[0].message_id, None);
    }

    #[test]
    fn unchanged_status_is_not_republished() {
        let mut b = StatusBoard::new();
        b.publish(T, Some("Working".into()));
        let u = b.take_pending().remove(0);
        b.confirm(T, &u.update, Some(5));

        assert!(!b.publish(T, Some("Working".into())));
        assert!(b.take_pending().is_empty());
    }

    #[test]
    fn vanished_status_becomes_clear() {
        let mut b = StatusBoard::new();
        assert!(!b.publish(T, None));

        b.publish(T, Some("Working".into()));
        let u = b.take_pending().remove(0);
        b.confirm(T, &u.update, Some(5));

        assert!(b.publish(T, None));
        let p = b.take_pending();
        assert_eq!(p[0].update, StatusUpdate::Clear);
        assert_eq!(p[0].message_id, Some(5));
        b.confirm(T, &p[0].update, None);
        assert_eq!(b.shown(T), None);
    }

    #[test]
    fn reverting_before_drain_cancels_update() {
        let mut b = StatusBoard::new();
        b.publish(T, Some("Working".into()));
        let u = b.take_pending().remove(0);
        b.confirm(T, &u.update, Some(5));

        b.publish(T, Some("Thinking".into()));
        b.publish(T, Some("Working".into()));
        assert!(b.take_pending().is_empty());
    }

    #[test]
    fn remove_topic_returns_message() {
        let mut b = StatusBoard::new();
        b.publish(T, Some("Working".into()));
        let u = b.take_pending().remove(0);
        b.confirm(T, &u.update, Some(9));
        assert_eq!(b.remove_topic(T), Some(9));
        assert_eq!(b.shown(T), None);
    }
}
