//! Offset Store: durable `transcript path → byte offset` map.
//!
//! Persisted as `monitor_offsets.json`. Loading is defensive: a missing or
//! corrupt file yields an empty store, so every transcript re-reads from 0
//! (duplicates over loss).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::persist::{atomic_write_json, load_json_or_default};

pub const OFFSETS_FILE: &str = "monitor_offsets.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetRecord {
    pub session_id: String,
    pub offset: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct OffsetFile {
    #[serde(default)]
    offsets: BTreeMap<String, OffsetRecord>,
}

#[derive(Debug)]
pub struct OffsetStore {
    path: PathBuf,
    records: BTreeMap<String, OffsetRecord>,
    dirty: bool,
}

impl OffsetStore {
    /// Empty, unsaved store at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: BTreeMap::new(),
            dirty: false,
        }
    }

    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file: OffsetFile = load_json_or_default(&path);
        debug!(path = %path.display(), entries = file.offsets.len(), "loaded offset store");
        Self {
            path,
            records: file.offsets,
            dirty: false,
        }
    }

    /// Stored offset, defaulting to 0.
    pub fn get(&self, transcript: &Path) -> u64 {
        self.tracked(transcript).unwrap_or(0)
    }

    /// Stored offset, or `None` if this transcript has never been tracked.
    pub fn tracked(&self, transcript: &Path) -> Option<u64> {
        self.records.get(&key(transcript)).map(|r| r.offset)
    }

    /// Record the offset reached in `transcript`.
    ///
    /// Offsets only move forward unless `reset` is set (the reader found the
    /// file truncated and re-read from 0). Returns whether anything changed.
    pub fn set(&mut self, transcript: &Path, session_id: &str, offset: u64, reset: bool) -> bool {
        let k = key(transcript);
        match self.records.get_mut(&k) {
            Some(rec) if rec.offset == offset && rec.session_id == session_id => false,
            Some(rec) if offset < rec.offset && !reset => {
                debug!(path = %k, stored = rec.offset, offset, "ignoring backwards offset");
                false
            }
            Some(rec) => {
                rec.offset = offset;
                rec.session_id = session_id.to_string();
                self.dirty = true;
                true
            }
            None => {
                self.records.insert(
                    k,
                    OffsetRecord {
                        session_id: session_id.to_string(),
                        offset,
                    },
                );
                self.dirty = true;
                true
            }
        }
    }

    /// Drop every record belonging to `session_id`.
    pub fn remove_session(&mut self, session_id: &str) -> usize {
        let before = self.records.len();
        self.records.retain(|_, r| r.session_id != session_id);
        let removed = before - self.records.len();
        self.dirty |= removed > 0;
        removed
    }

    /// Keep only records whose session is in `live_sessions`.
    pub fn retain_sessions(&mut self, live_sessions: &HashSet<&str>) -> usize {
        let before = self.records.len();
        self.records
            .retain(|_, r| live_sessions.contains(r.session_id.as_str()));
        let removed = before - self.records.len();
        if removed > 0 {
            info!(removed, "removed offset records for sessions no longer mapped");
            self.dirty = true;
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn save(&mut self) -> Result<(), StoreError> {
        let file = OffsetFile {
            offsets: self.records.clone(),
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

fn key(transcript: &Path) -> String {
    transcript.to_string_lossy().into_owned()
}
