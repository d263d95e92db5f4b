//! tmux server epoch tracking.
//!
//! Window ids are only unique within one server lifetime. The epoch is the
//! server pid plus its start time; a change means every stored window id is
//! suspect and bindings must be re-resolved by display name.

use crate::error::TmuxError;
use crate::executor::TmuxCommandRunner;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmuxEpoch {
    pub server_pid: u32,
    pub start_time: u64,
}

/// Read the running server's epoch through `session`. `None` when no server
/// or session is up.
pub fn read_epoch(runner: &impl TmuxCommandRunner, session: &str) -> Result<Option<TmuxEpoch>, TmuxError> {
    let out = match runner.run(&["display-message", "-t", session, "-p", "#{pid}:#{start_time}"]) {
        Ok(out) => out,
        Err(e) if e.is_absent() => return Ok(None),
        Err(e) => return Err(e),
    };
    parse_epoch(out.trim()).map(Some)
}

fn parse_epoch(s: &str) -> Result<TmuxEpoch, TmuxError> {
    let bad = || TmuxError::ParseError {
        line_num: 1,
        detail: format!("unexpected epoch output {s:?}"),
    };
    let (pid, start) = s.split_once(':').ok_or_else(bad)?;
    Ok(TmuxEpoch {
        server_pid: pid.trim().parse().map_err(|_| bad())?,
        start_time: start.trim().parse().map_err(|_| bad())?,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochChange {
    /// First observation since this process started.
    FirstSeen,
    Unchanged,
    /// The server restarted; window ids from before are meaningless.
    Restarted,
    /// No server is running.
    Gone,
}

#[derive(Debug, Clone, Default)]
pub struct EpochTracker {
    current: Option<TmuxEpoch>,
    seen_any: bool,
}

impl EpochTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&TmuxEpoch> {
        self.current.as_ref()
    }

    pub fn observe(&mut self, epoch: Option<TmuxEpoch>) -> EpochChange {
        let change = match (&self.current, &epoch) {
            (_, None) => EpochChange::Gone,
            (None, Some(_)) if !self.seen_any => EpochChange::FirstSeen,
            (Some(old), Some(new)) if old == new => EpochChange::Unchanged,
            _ => EpochChange::Restarted,
        };
        if epoch.is_some() {
            self.seen_any = true;
        }
        self.current = epoch;
        change
    }
}
