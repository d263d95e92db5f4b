//! TmuxWindowInfo, list-windows format string, and parser.

use crate::error::TmuxError;
use crate::executor::TmuxCommandRunner;
use serde::{Deserialize, Serialize};

/// Tab-delimited format string for `tmux list-windows -F`.
///
/// Pane fields describe the window's active pane.
pub const LIST_WINDOWS_FORMAT: &str = "#{session_name}\t#{window_id}\t#{window_name}\t#{pane_current_command}\t#{pane_current_path}\t#{pane_dead}\t#{window_active}\t#{pane_pid}";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TmuxWindowInfo {
    pub session_name: String,
    pub window_id: String,
    pub window_name: String,
    pub current_cmd: String,
    pub current_path: String,
    pub pane_dead: bool,
    pub active: bool,
    pub pane_pid: Option<u32>,
}

/// List the windows of one tmux session.
///
/// A missing server or session yields an empty list: there is simply nothing
/// live yet.
pub fn list_windows(
    runner: &impl TmuxCommandRunner,
    session: &str,
) -> Result<Vec<TmuxWindowInfo>, TmuxError> {
    match runner.run(&["list-windows", "-t", session, "-F", LIST_WINDOWS_FORMAT]) {
        Ok(output) => parse_list_windows_output(&output),
        Err(e) if e.is_absent() => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

pub fn parse_list_windows_output(output: &str) -> Result<Vec<TmuxWindowInfo>, TmuxError> {
    let mut windows = Vec::new();
    for (idx, line) in output.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        windows.push(parse_line(line, idx + 1)?);
    }
    Ok(windows)
}

fn parse_line(line: &str, line_num: usize) -> Result<TmuxWindowInfo, TmuxError> {
    let parts: Vec<&str> = line.split('\t').collect();
    if parts.len() < 7 {
        return Err(TmuxError::ParseError {
            line_num,
            detail: format!(
                "expected at least 7 tab-separated fields, got {}",
                parts.len()
            ),
        });
    }
    if !parts[1].starts_with('@') {
        return Err(TmuxError::ParseError {
            line_num,
            detail: format!("window id {:?} does not start with '@'", parts[1]),
        });
    }

    Ok(TmuxWindowInfo {
        session_name: parts[0].to_string(),
        window_id: parts[1].to_string(),
        window_name: parts[2].to_string(),
        current_cmd: parts[3].to_string(),
        current_path: parts[4].to_string(),
        pane_dead: parse_bool(parts[5]),
        active: parse_bool(parts[6]),
        pane_pid: parts.get(7).and_then(|s| s.trim().parse().ok()),
    })
}

fn parse_bool(s: &str) -> bool {
    matches!(s.trim(), "1" | "true")
}
