//! Resolved daemon configuration.
//!
//! Flags and environment variables are parsed by clap; this module turns
//! them into validated values and derives the state file paths.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::TimeDelta;

use topicmux_core::reconcile::{LateResultPolicy, PendingPolicy};
use topicmux_core::types::RouteTarget;
use topicmux_daemon::binding_store::BINDINGS_FILE;
use topicmux_daemon::delivery::QueuePolicy;
use topicmux_daemon::offset_store::OFFSETS_FILE;
use topicmux_source_claude_jsonl::discovery::default_projects_dir;

use crate::cli::{Cli, DaemonOpts};

pub const SESSION_MAP_FILE: &str = "session_map.json";
pub const SESSION_MAP_LOCK_FILE: &str = "session_map.lock";

#[derive(Debug, Clone)]
pub struct Config {
    pub state_dir: PathBuf,
    pub socket_path: String,
    pub tmux_session: String,
    pub tmux_socket: Option<String>,
    pub monitor_interval: Duration,
    pub status_interval: Duration,
    pub queue: QueuePolicy,
    pub pending: PendingPolicy,
    pub default_route: Option<RouteTarget>,
    pub projects_dir: PathBuf,
    pub outbox: Option<PathBuf>,
}

impl Config {
    pub fn from_cli(cli: &Cli, opts: &DaemonOpts) -> anyhow::Result<Self> {
        let late_results: LateResultPolicy = opts.late_results.parse()?;
        let default_route = opts
            .default_route
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::parse::<RouteTarget>)
            .transpose()?;
        if opts.merge_ceiling == 0 {
            anyhow::bail!("--merge-ceiling must be positive");
        }

        Ok(Self {
            state_dir: resolve_state_dir(cli.state_dir.as_deref())?,
            socket_path: cli
                .socket_path
                .clone()
                .unwrap_or_else(crate::cli::default_socket_path),
            tmux_session: cli.tmux_session.clone(),
            tmux_socket: cli.tmux_socket.clone(),
            monitor_interval: Duration::from_millis(opts.monitor_interval_ms.max(100)),
            status_interval: Duration::from_millis(opts.status_interval_ms.max(100)),
            queue: QueuePolicy {
                min_interval: Duration::from_millis(opts.send_interval_ms),
                merge_ceiling: opts.merge_ceiling,
            },
            pending: PendingPolicy {
                timeout: i64::try_from(opts.pending_timeout_secs)
                    .ok()
                    .and_then(TimeDelta::try_seconds)
                    .ok_or_else(|| anyhow::anyhow!("--pending-timeout-secs out of range"))?,
                late_results,
            },
            default_route,
            projects_dir: match &opts.projects_dir {
                Some(p) => p.clone(),
                None => default_projects_dir()
                    .ok_or_else(|| anyhow::anyhow!("HOME not set; pass --projects-dir"))?,
            },
            outbox: opts.outbox.clone(),
        })
    }

    pub fn bindings_path(&self) -> PathBuf {
        self.state_dir.join(BINDINGS_FILE)
    }

    pub fn offsets_path(&self) -> PathBuf {
        self.state_dir.join(OFFSETS_FILE)
    }

    pub fn session_map_path(&self) -> PathBuf {
        session_map_path(&self.state_dir)
    }

    pub fn session_map_lock_path(&self) -> PathBuf {
        session_map_lock_path(&self.state_dir)
    }
}

pub fn session_map_path(state_dir: &Path) -> PathBuf {
    state_dir.join(SESSION_MAP_FILE)
}

pub fn session_map_lock_path(state_dir: &Path) -> PathBuf {
    state_dir.join(SESSION_MAP_LOCK_FILE)
}

/// `--state-dir` / `TOPICMUX_DIR`, else `~/.topicmux`.
pub fn resolve_state_dir(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(p) = explicit {
        return Ok(p.to_path_buf());
    }
    let home = std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME not set; pass --state-dir"))?;
    Ok(PathBuf::from(home).join(".topicmux"))
}
