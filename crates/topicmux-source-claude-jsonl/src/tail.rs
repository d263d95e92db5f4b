//! Per-session tail driver: reader → translator → reconciler.
//!
//! The caller owns durable offsets. A poll takes the stored offset (or
//! `None` the first time a session is seen), reads what was appended, and
//! returns notifications tagged with the offset just past the line they came
//! from, plus the new end offset to store.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use topicmux_core::reconcile::{PendingPolicy, Reconciler};
use topicmux_core::types::Notification;

use crate::reader::{TranscriptLines, file_len};
use crate::translate::Translator;

#[derive(Debug, Clone, PartialEq)]
pub struct TailedNotification {
    pub notification: Notification,
    /// Offset just past the transcript line this came from.
    pub end_offset: u64,
}

#[derive(Debug, Default)]
pub struct PollOutcome {
    pub notifications: Vec<TailedNotification>,
    pub end_offset: u64,
    /// The file was shorter than the stored offset and was re-read from 0.
    pub reset: bool,
    /// Invocations whose result did not arrive within the pending timeout.
    pub evicted: Vec<String>,
}

#[derive(Debug)]
pub struct SessionTail {
    session_id: String,
    transcript: PathBuf,
    translator: Translator,
    reconciler: Reconciler,
}

impl SessionTail {
    pub fn new(session_id: impl Into<String>, transcript: PathBuf, policy: PendingPolicy) -> Self {
        let session_id = session_id.into();
        Self {
            reconciler: Reconciler::new(session_id.clone(), policy),
            session_id,
            transcript,
            translator: Translator::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn transcript(&self) -> &Path {
        &self.transcript
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Read and reconcile everything appended since `offset`.
    ///
    /// `None` means the session has never been tracked: history is skipped
    /// by starting at the current end of file (or 0 if the file does not
    /// exist yet).
    pub fn poll(&mut self, offset: Option<u64>, now: DateTime<Utc>) -> PollOutcome {
        let Some(start) = offset else {
            let end = file_len(&self.transcript).unwrap_or(0);
            info!(session_id = %self.session_id, offset = end, "tracking new session from end of transcript");
            return PollOutcome {
                end_offset: end,
                ..PollOutcome::default()
            };
        };

        let mut lines = TranscriptLines::open(&self.transcript, start);
        let mut notifications = Vec::new();
        for line in lines.by_ref() {
            let records = self.translator.translate(&line.value);
            notifications.extend(
                self.reconciler
                    .reconcile(records, now)
                    .map(|notification| TailedNotification {
                        notification,
                        end_offset: line.end_offset,
                    }),
            );
        }

        let evicted = self.reconciler.evict_expired(now);
        if !evicted.is_empty() {
            debug!(session_id = %self.session_id, evicted = evicted.len(), "evicted stale pending invocations");
        }

        PollOutcome {
            notifications,
            end_offset: lines.end_offset(),
            reset: lines.was_reset(),
            evicted,
        }
    }

    /// Forget pairing state, e.g. when the session's topic is closed.
    pub fn clear(&mut self) {
        self.reconciler.clear();
        self.translator = Translator::new();
    }
}
