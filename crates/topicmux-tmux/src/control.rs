//! Window control: capture, keystrokes, kill, create.

use crate::error::TmuxError;
use crate::executor::TmuxCommandRunner;

/// Capture the visible contents of a window's active pane as plain text.
pub fn capture_window(runner: &impl TmuxCommandRunner, window_id: &str) -> Result<String, TmuxError> {
    runner.run(&["capture-pane", "-p", "-J", "-t", window_id])
}

/// Type `text` literally into the window without submitting it.
///
/// Callers send Enter separately (see [`send_enter`]) after a short pause;
/// an Enter arriving in the same input batch can be read as a newline.
pub fn send_keys(runner: &impl TmuxCommandRunner, window_id: &str, text: &str) -> Result<(), TmuxError> {
    if text.is_empty() {
        return Ok(());
    }
    runner.run(&["send-keys", "-t", window_id, "-l", "--", text])?;
    Ok(())
}

pub fn send_enter(runner: &impl TmuxCommandRunner, window_id: &str) -> Result<(), TmuxError> {
    send_special_key(runner, window_id, "Enter")
}

/// Send a named key such as `Escape`, `Up` or `C-c`.
pub fn send_special_key(runner: &impl TmuxCommandRunner, window_id: &str, key: &str) -> Result<(), TmuxError> {
    runner.run(&["send-keys", "-t", window_id, key])?;
    Ok(())
}

/// Kill a window. Returns `false` if it was already gone.
pub fn kill_window(runner: &impl TmuxCommandRunner, window_id: &str) -> Result<bool, TmuxError> {
    match runner.run(&["kill-window", "-t", window_id]) {
        Ok(_) => Ok(true),
        Err(e) if e.is_absent() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Make sure the detached session exists.
pub fn ensure_session(runner: &impl TmuxCommandRunner, session: &str) -> Result<(), TmuxError> {
    match runner.run(&["has-session", "-t", session]) {
        Ok(_) => Ok(()),
        Err(e) if e.is_absent() => {
            tracing::info!(session, "creating tmux session");
            runner.run(&["new-session", "-d", "-s", session])?;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Pick `base`, or `base-2`, `base-3`, … if the name is already taken.
pub fn unique_window_name<'a>(existing: impl IntoIterator<Item = &'a str> + Clone, base: &str) -> String {
    let taken = |name: &str| existing.clone().into_iter().any(|e| e == name);
    if !taken(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{base}-{n}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}

/// Create a detached window in `session` and return its window id.
pub fn new_window(
    runner: &impl TmuxCommandRunner,
    session: &str,
    cwd: &str,
    name: &str,
) -> Result<String, TmuxError> {
    let target = format!("{session}:");
    let out = runner.run(&[
        "new-window", "-d", "-P", "-F", "#{window_id}", "-t", &target, "-c", cwd, "-n", name,
    ])?;
    let window_id = out.trim();
    if !window_id.starts_with('@') {
        return Err(TmuxError::ParseError {
            line_num: 1,
            detail: format!("new-window printed {window_id:?}, expected a window id"),
        });
    }
    Ok(window_id.to_string())
}

/// Evaluate a tmux format string against `target`.
pub fn display_message(
    runner: &impl TmuxCommandRunner,
    target: &str,
    format: &str,
) -> Result<String, TmuxError> {
    let out = runner.run(&["display-message", "-t", target, "-p", format])?;
    Ok(out.trim_end_matches('\n').to_string())
}
