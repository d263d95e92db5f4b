//! Topic ↔ window binding table.
//!
//! Strict bijection: a topic maps to at most one window and a window to at
//! most one topic. Window ids are epoch-local, so every record also keeps the
//! window's display name; after a tmux restart `reresolve` remaps records by
//! name against the live snapshot. Only resolved records own their window id:
//! an unresolved record keeps its old id for reference and never blocks a
//! window that reuses it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::identity::IdentityResolver;
use crate::types::TopicKey;

// ─── Binding Record ───────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingState {
    #[default]
    Resolved,
    /// The bound window id is gone and no live window carries the stored name.
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingRecord {
    pub topic: TopicKey,
    pub window_id: String,
    pub display_name: String,
    #[serde(default)]
    pub state: BindingState,
    /// Transcript offset up to which this topic has been delivered.
    #[serde(default)]
    pub last_read_offset: Option<u64>,
    pub bound_at: DateTime<Utc>,
}

/// How far live window ids can be trusted during `reresolve`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdTrust {
    /// The tmux server is the one the bindings were made against: a live id
    /// is the bound window, whatever it is called now.
    SameServer,
    /// New or unknown server: ids may have been reused, so a live id only
    /// counts while it still carries the stored name.
    NewServer,
}

/// What `reresolve` did to one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    Remapped {
        topic: TopicKey,
        old_window_id: String,
        new_window_id: String,
    },
    Renamed {
        topic: TopicKey,
        window_id: String,
        old_name: String,
        new_name: String,
    },
    Unresolved {
        topic: TopicKey,
        display_name: String,
    },
}

// ─── Binding Table ────────────────────────────────────────────────

#[derive(Debug, Default, Clone)]
pub struct BindingTable {
    by_topic: BTreeMap<TopicKey, BindingRecord>,
    by_window: HashMap<String, TopicKey>,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from persisted records, enforcing the bijection.
    ///
    /// Later records win on conflict, matching the order bindings were made.
    pub fn from_records(records: impl IntoIterator<Item = BindingRecord>) -> Self {
        let mut table = Self::new();
        for r in records {
            table.insert(r);
        }
        table
    }

    pub fn records(&self) -> impl Iterator<Item = &BindingRecord> {
        self.by_topic.values()
    }

    pub fn len(&self) -> usize {
        self.by_topic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_topic.is_empty()
    }

    /// Bind `topic` to `window_id`. Returns the records displaced to keep the
    /// table one-to-one (the topic's previous window, the window's previous
    /// topic).
    pub fn bind(
        &mut self,
        topic: TopicKey,
        window_id: &str,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> Vec<BindingRecord> {
        self.insert(BindingRecord {
            topic,
            window_id: window_id.to_string(),
            display_name: display_name.to_string(),
            state: BindingState::Resolved,
            last_read_offset: None,
            bound_at: now,
        })
    }

    fn insert(&mut self, record: BindingRecord) -> Vec<BindingRecord> {
        let resolved = record.state == BindingState::Resolved;
        let mut displaced = Vec::new();
        if resolved
            && let Some(old_topic) = self.by_window.get(&record.window_id).copied()
            && old_topic != record.topic
            && let Some(old) = self.unbind(old_topic)
        {
            displaced.push(old);
        }
        if let Some(old) = self.unbind(record.topic)
            && old.window_id != record.window_id
        {
            displaced.push(old);
        }
        if resolved {
            self.by_window.insert(record.window_id.clone(), record.topic);
        }
        self.by_topic.insert(record.topic, record);
        displaced
    }

    pub fn unbind(&mut self, topic: TopicKey) -> Option<BindingRecord> {
        let record = self.by_topic.remove(&topic)?;
        if self.by_window.get(&record.window_id) == Some(&topic) {
            self.by_window.remove(&record.window_id);
        }
        Some(record)
    }

    pub fn lookup_by_topic(&self, topic: TopicKey) -> Option<&BindingRecord> {
        self.by_topic.get(&topic)
    }

    pub fn lookup_by_window(&self, window_id: &str) -> Option<&BindingRecord> {
        let topic = self.by_window.get(window_id)?;
        self.by_topic.get(topic)
    }

    /// Distinct recipients that currently own at least one binding.
    pub fn recipients(&self) -> Vec<i64> {
        let mut out: Vec<i64> = self.by_topic.keys().map(|k| k.recipient).collect();
        out.dedup();
        out
    }

    pub fn unresolved(&self) -> impl Iterator<Item = &BindingRecord> {
        self.by_topic
            .values()
            .filter(|r| r.state == BindingState::Unresolved)
    }

    /// Advance the delivered position. Never moves backwards.
    pub fn advance_last_read(&mut self, topic: TopicKey, offset: u64) -> bool {
        match self.by_topic.get_mut(&topic) {
            Some(r) if r.last_read_offset.is_none_or(|prev| offset > prev) => {
                r.last_read_offset = Some(offset);
                true
            }
            _ => false,
        }
    }

    /// Validate every record against the live snapshot.
    ///
    /// A record is valid when its window id is live and still carries the
    /// stored display name. Under [`IdTrust::SameServer`] a resolved record
    /// whose id is live stays valid after a rename and takes the new name.
    /// Every other record is looked up by display name and rewritten to the
    /// new id; windows held by valid records, or already claimed earlier in
    /// the pass, are not eligible. A record that finds no window is marked
    /// unresolved (reported once), and an unresolved record whose window
    /// reappears becomes resolved again.
    pub fn reresolve(&mut self, resolver: &IdentityResolver, trust: IdTrust) -> Vec<ResolveOutcome> {
        let mut outcomes = Vec::new();

        // Resolved records claim their ids first; an unresolved record never
        // takes a window from one.
        let mut records: Vec<&BindingRecord> = self.by_topic.values().collect();
        records.sort_by_key(|r| r.state != BindingState::Resolved);

        let mut claimed: HashMap<String, TopicKey> = HashMap::new();
        let mut stale: Vec<TopicKey> = Vec::new();
        for record in records {
            let trust_id = trust == IdTrust::SameServer && record.state == BindingState::Resolved;
            let valid = !claimed.contains_key(&record.window_id)
                && resolver
                    .find_live(&record.window_id)
                    .is_some_and(|w| trust_id || w.display_name == record.display_name);
            if valid {
                claimed.insert(record.window_id.clone(), record.topic);
            } else {
                stale.push(record.topic);
            }
        }
        for record in self.by_topic.values_mut() {
            if claimed.get(&record.window_id) != Some(&record.topic) {
                continue;
            }
            record.state = BindingState::Resolved;
            if let Some(window) = resolver.find_live(&record.window_id)
                && window.display_name != record.display_name
            {
                let old_name = std::mem::replace(&mut record.display_name, window.display_name.clone());
                outcomes.push(ResolveOutcome::Renamed {
                    topic: record.topic,
                    window_id: record.window_id.clone(),
                    old_name,
                    new_name: window.display_name.clone(),
                });
            }
        }

        for topic in stale {
            let Some(record) = self.by_topic.get_mut(&topic) else {
                continue;
            };
            let candidate = resolver
                .resolve_stale(&record.display_name)
                .map(|w| w.window_id.clone())
                .filter(|id| !claimed.contains_key(id));

            match candidate {
                Some(new_window_id) => {
                    claimed.insert(new_window_id.clone(), topic);
                    let old_window_id =
                        std::mem::replace(&mut record.window_id, new_window_id.clone());
                    record.state = BindingState::Resolved;
                    outcomes.push(ResolveOutcome::Remapped {
                        topic,
                        old_window_id,
                        new_window_id,
                    });
                }
                None => {
                    if record.state != BindingState::Unresolved {
                        record.state = BindingState::Unresolved;
                        outcomes.push(ResolveOutcome::Unresolved {
                            topic,
                            display_name: record.display_name.clone(),
                        });
                    }
                }
            }
        }

        self.by_window = self
            .by_topic
            .iter()
            .filter(|(_, r)| r.state == BindingState::Resolved)
            .map(|(topic, r)| (r.window_id.clone(), *topic))
            .collect();
        outcomes
    }
}

// ─── Tests ────────────────────────────────────────────────────────
