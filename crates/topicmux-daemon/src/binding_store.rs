//! Binding Store: the binding table persisted as `bindings.json`.
//!
//! Structural changes (bind, unbind, re-resolution) are written through
//! immediately. Last-read advances only mark the store dirty and are flushed
//! by the monitor once per tick.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

use topicmux_core::binding::{BindingRecord, BindingTable, IdTrust, ResolveOutcome};
use topicmux_core::identity::IdentityResolver;
use topicmux_core::types::TopicKey;

use crate::error::StoreError;
use crate::persist::{atomic_write_json, load_json_or_default};

pub const BINDINGS_FILE: &str = "bindings.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct BindingFile {
    #[serde(default)]
    bindings: Vec<BindingRecord>,
}

#[derive(Debug)]
pub struct BindingStore {
    path: PathBuf,
    table: BindingTable,
    dirty: bool,
}

impl BindingStore {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file: BindingFile = load_json_or_default(&path);
        let stored = file.bindings.len();
        let table = BindingTable::from_records(file.bindings);
        let dirty = table.len() != stored;
        if dirty {
            warn!(
                path = %path.display(),
                stored,
                kept = table.len(),
                "dropped conflicting binding records on load"
            );
        }
        Self {
            path,
            table,
            dirty,
        }
    }

    pub fn table(&self) -> &BindingTable {
        &self.table
    }

    pub fn bind(
        &mut self,
        topic: TopicKey,
        window_id: &str,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<BindingRecord>, StoreError> {
        let displaced = self.table.bind(topic, window_id, display_name, now);
        info!(%topic, window_id, display_name, displaced = displaced.len(), "bound topic");
        self.save()?;
        Ok(displaced)
    }

    pub fn unbind(&mut self, topic: TopicKey) -> Result<Option<BindingRecord>, StoreError> {
        let removed = self.table.unbind(topic);
        if removed.is_some() {
            info!(%topic, "unbound topic");
            self.save()?;
        }
        Ok(removed)
    }

    /// Remap records whose window id is stale and follow renames. Every
    /// outcome is persisted before returning.
    pub fn reresolve(
        &mut self,
        resolver: &IdentityResolver,
        trust: IdTrust,
    ) -> Result<Vec<ResolveOutcome>, StoreError> {
        let outcomes = self.table.reresolve(resolver, trust);
        for o in &outcomes {
            match o {
                ResolveOutcome::Remapped {
                    topic,
                    old_window_id,
                    new_window_id,
                } => info!(%topic, old_window_id, new_window_id, "re-resolved binding"),
                ResolveOutcome::Renamed {
                    topic,
                    window_id,
                    old_name,
                    new_name,
                } => info!(%topic, window_id, old_name, new_name, "bound window renamed"),
                ResolveOutcome::Unresolved {
                    topic,
                    display_name,
                } => warn!(%topic, display_name, "bound window not found"),
            }
        }
        if !outcomes.is_empty() || self.dirty {
            self.save()?;
        }
        Ok(outcomes)
    }

    pub fn advance_last_read(&mut self, topic: TopicKey, offset: u64) {
        self.dirty |= self.table.advance_last_read(topic, offset);
    }

    pub fn save(&mut self) -> Result<(), StoreError> {
        let file = BindingFile {
            bindings: self.table.records().cloned().collect(),
        };
        atomic_write_json(&self.path, &file)?;
        self.dirty = false;
        Ok(())
    }

    pub fn save_if_dirty(&mut self) -> Result<bool, StoreError> {
        if !self.dirty {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }
}
