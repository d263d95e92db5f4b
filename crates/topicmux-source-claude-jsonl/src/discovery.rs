//! Session-map parsing and transcript discovery.
//!
//! The session-start hook writes `session_map.json`, keyed
//! `<tmux_session>:<window_id>`. Each entry names the Claude session running
//! in that window and, usually, its transcript path. When the path is absent
//! the transcript is looked up under `~/.claude/projects`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use topicmux_core::types::SessionAssociation;

// ─── Session map ──────────────────────────────────────────────────

/// One value in `session_map.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMapEntry {
    pub session_id: String,
    #[serde(default)]
    pub cwd: String,
    #[serde(default)]
    pub window_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_path: Option<String>,
}

pub fn session_map_key(tmux_session: &str, window_id: &str) -> String {
    format!("{tmux_session}:{window_id}")
}

/// Extract this tmux session's associations from a raw session map.
///
/// Entries for other tmux sessions, non-object values and entries with an
/// empty session id are skipped.
pub fn parse_session_map(raw: &Value, tmux_session: &str) -> Vec<SessionAssociation> {
    let Some(obj) = raw.as_object() else {
        return Vec::new();
    };
    let prefix = format!("{tmux_session}:");
    let mut out: Vec<SessionAssociation> = obj
        .iter()
        .filter_map(|(key, value)| {
            let window_id = key.strip_prefix(&prefix)?;
            let entry: SessionMapEntry = serde_json::from_value(value.clone()).ok()?;
            if entry.session_id.is_empty() || window_id.is_empty() {
                return None;
            }
            Some(SessionAssociation {
                window_id: window_id.to_string(),
                session_id: entry.session_id,
                cwd: entry.cwd,
                display_name: entry.window_name,
                transcript_path: entry.transcript_path.filter(|p| !p.is_empty()),
            })
        })
        .collect();
    out.sort_by(|a, b| a.window_id.cmp(&b.window_id));
    out
}

/// Read the session map. Missing or corrupt files read as empty.
pub fn load_session_map(path: &Path, tmux_session: &str) -> Vec<SessionAssociation> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read session map");
            return Vec::new();
        }
    };
    match serde_json::from_str::<Value>(&content) {
        Ok(raw) => parse_session_map(&raw, tmux_session),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "session map is not valid JSON");
            Vec::new()
        }
    }
}

/// Drop this tmux session's entries whose window is not in `live_window_ids`.
/// Returns the removed keys.
pub fn prune_session_map(
    raw: &mut Map<String, Value>,
    tmux_session: &str,
    live_window_ids: &HashSet<&str>,
) -> Vec<String> {
    let prefix = format!("{tmux_session}:");
    let stale: Vec<String> = raw
        .keys()
        .filter(|k| {
            k.strip_prefix(&prefix)
                .is_some_and(|w| !live_window_ids.contains(w))
        })
        .cloned()
        .collect();
    for k in &stale {
        raw.remove(k);
    }
    stale
}

/// Rewrite `window_name` of entries whose window was renamed while its
/// session kept running. Only entries that still name the same session are
/// touched. Returns the updated keys.
pub fn sync_window_names<'a>(
    raw: &mut Map<String, Value>,
    tmux_session: &str,
    running: impl IntoIterator<Item = &'a SessionAssociation>,
) -> Vec<String> {
    let mut renamed = Vec::new();
    for a in running {
        if a.display_name.is_empty() {
            continue;
        }
        let key = session_map_key(tmux_session, &a.window_id);
        let Some(Value::Object(entry)) = raw.get_mut(&key) else {
            continue;
        };
        if entry.get("session_id").and_then(Value::as_str) != Some(a.session_id.as_str())
            || entry.get("window_name").and_then(Value::as_str) == Some(a.display_name.as_str())
        {
            continue;
        }
        entry.insert("window_name".into(), Value::String(a.display_name.clone()));
        renamed.push(key);
    }
    renamed.sort();
    renamed
}

// ─── Projects directory ───────────────────────────────────────────

/// Entry in a `sessions-index.json` file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIndexEntry {
    pub session_id: String,
    pub full_path: String,
    #[serde(default)]
    pub project_path: Option<String>,
    #[serde(default)]
    pub is_sidechain: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsIndex {
    #[serde(default)]
    pub original_path: String,
    #[serde(default)]
    pub entries: Vec<SessionIndexEntry>,
}

/// Encode a path the way Claude Code names project directories: every
/// non-alphanumeric character becomes `-`.
/// Example: `/Users/vm/project` -> `-Users-vm-project`
pub fn encode_path(path: &str) -> String {
    path.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// `$HOME/.claude/projects`.
pub fn default_projects_dir() -> Option<PathBuf> {
    home_dir().map(|h| h.join(".claude").join("projects"))
}

/// Locate the transcript for an association.
///
/// Order: the hook-provided path if it exists; the conventional
/// `<projects>/<encoded cwd>/<session_id>.jsonl`; a scan of all project
/// directories (index entries first, then bare `*.jsonl` files).
pub fn resolve_transcript(assoc: &SessionAssociation, projects_dir: &Path) -> Option<PathBuf> {
    if let Some(p) = assoc.transcript_path.as_deref().map(PathBuf::from)
        && p.is_file()
    {
        return Some(p);
    }

    if !assoc.cwd.is_empty() {
        let direct = projects_dir
            .join(encode_path(&assoc.cwd))
            .join(format!("{}.jsonl", assoc.session_id));
        if direct.is_file() {
            return Some(direct);
        }
    }

    let found = scan_projects_for(projects_dir, &assoc.session_id);
    if found.is_none() {
        debug!(session_id = %assoc.session_id, "no transcript found for session");
    }
    found
}

fn scan_projects_for(projects_dir: &Path, session_id: &str) -> Option<PathBuf> {
    let dirs = std::fs::read_dir(projects_dir).ok()?;
    let file_name = format!("{session_id}.jsonl");
    let mut bare_match = None;

    for dir in dirs.flatten() {
        let dir = dir.path();
        if !dir.is_dir() {
            continue;
        }
        let index_path = dir.join("sessions-index.json");
        if index_path.is_file() {
            match read_sessions_index(&index_path) {
                Ok(index) => {
                    if let Some(e) = index
                        .entries
                        .iter()
                        .find(|e| e.session_id == session_id && !e.is_sidechain)
                    {
                        let p = PathBuf::from(&e.full_path);
                        if p.is_file() {
                            return Some(p);
                        }
                    }
                }
                Err(e) => {
                    warn!(path = %index_path.display(), error = %e, "failed to read sessions-index.json");
                }
            }
        }
        let candidate = dir.join(&file_name);
        if bare_match.is_none() && candidate.is_file() {
            bare_match = Some(candidate);
        }
    }
    bare_match
}

fn read_sessions_index(path: &Path) -> Result<SessionsIndex, String> {
    let content = std::fs::read_to_string(path).map_err(|e| format!("read error: {e}"))?;
    serde_json::from_str(&content).map_err(|e| format!("parse error: {e}"))
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
