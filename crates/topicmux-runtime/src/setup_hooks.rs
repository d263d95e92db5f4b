//! Install the topicmux SessionStart hook into Claude settings.

use std::path::PathBuf;

use serde_json::{Value, json};

use topicmux_daemon::persist::atomic_write_json;

use crate::cli::SetupHookOpts;

const HOOK_EVENT: &str = "SessionStart";
const HOOK_TIMEOUT_SECS: u64 = 5;

/// Resolve the settings.json path based on scope.
pub fn settings_path(scope: &str) -> anyhow::Result<PathBuf> {
    match scope {
        "project" => Ok(PathBuf::from(".claude/settings.json")),
        "user" => {
            let home = std::env::var("HOME")
                .map_err(|_| anyhow::anyhow!("HOME not set; cannot resolve user scope"))?;
            Ok(PathBuf::from(home).join(".claude/settings.json"))
        }
        _ => anyhow::bail!("invalid scope: {scope:?} (expected \"project\" or \"user\")"),
    }
}

/// The command Claude runs: `--command`, else this executable plus ` hook`.
pub fn hook_command(explicit: Option<&str>) -> anyhow::Result<String> {
    if let Some(cmd) = explicit {
        return Ok(cmd.to_string());
    }
    let exe = std::env::current_exe()?;
    Ok(format!("{} hook", shell_quote(&exe.to_string_lossy())))
}

/// Shell-quote a path for safe embedding in a shell command string.
///
/// Wraps in single quotes if the path contains whitespace, quotes, or backslashes.
/// Single quotes inside the path are escaped as `'\''`.
fn shell_quote(path: &str) -> String {
    if path.contains(|c: char| c.is_whitespace() || c == '\'' || c == '"' || c == '\\') {
        format!("'{}'", path.replace('\'', "'\\''"))
    } else {
        path.to_string()
    }
}

/// Any SessionStart command that runs `topicmux hook`, by bare name or by
/// path.
pub fn is_hook_installed(settings: &Value) -> bool {
    let Some(entries) = settings["hooks"][HOOK_EVENT].as_array() else {
        return false;
    };
    entries
        .iter()
        .filter_map(|e| e["hooks"].as_array())
        .flatten()
        .filter_map(|h| h["command"].as_str())
        .any(runs_topicmux_hook)
}

fn runs_topicmux_hook(cmd: &str) -> bool {
    let Some(program) = cmd.trim().strip_suffix(" hook") else {
        return false;
    };
    let program = program.trim().trim_matches('\'');
    program == "topicmux" || program.ends_with("/topicmux")
}

/// Append a SessionStart entry for `command` unless one is already present.
/// Returns whether `settings` changed.
pub fn merge_hook(settings: &mut Value, command: &str) -> anyhow::Result<bool> {
    if is_hook_installed(settings) {
        return Ok(false);
    }
    let obj = settings
        .as_object_mut()
        .ok_or_else(|| anyhow::anyhow!("settings.json is not a JSON object"))?;
    let hooks = obj
        .entry("hooks")
        .or_insert_with(|| json!({}))
        .as_object_mut()
        .ok_or_else(|| anyhow::anyhow!("\"hooks\" in settings.json is not an object"))?;
    let entries = hooks
        .entry(HOOK_EVENT)
        .or_insert_with(|| json!([]))
        .as_array_mut()
        .ok_or_else(|| anyhow::anyhow!("\"hooks.{HOOK_EVENT}\" is not an array"))?;
    entries.push(json!({
        "hooks": [{
            "type": "command",
            "command": command,
            "timeout": HOOK_TIMEOUT_SECS,
        }]
    }));
    Ok(true)
}

/// Apply the hook to the settings file (merge, not overwrite). Returns the
/// path and whether it was modified.
pub fn apply_hook(opts: &SetupHookOpts) -> anyhow::Result<(PathBuf, bool)> {
    let path = settings_path(&opts.scope)?;
    let command = hook_command(opts.command.as_deref())?;

    let mut settings: Value = if path.exists() {
        let content = std::fs::read_to_string(&path)?;
        serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("{} is not valid JSON: {e}", path.display()))?
    } else {
        json!({})
    };

    let changed = merge_hook(&mut settings, &command)?;
    if changed {
        atomic_write_json(&path, &settings)?;
        tracing::info!(path = %path.display(), command, "installed SessionStart hook");
    }
    Ok((path, changed))
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_into_empty_settings() {
        let mut settings = json!({});
        assert!(merge_hook(&mut settings, "/usr/local/bin/topicmux hook").expect("ok"));
        let entry = &settings["hooks"]["SessionStart"][0]["hooks"][0];
        assert_eq!(entry["type"], "command");
        assert_eq!(entry["command"], "/usr/local/bin/topicmux hook");
        assert_eq!(entry["timeout"], 5);
    }

    #[test]
    fn merge_is_idempotent() {
        let mut settings = json!({});
        merge_hook(&mut settings, "/opt/bin/topicmux hook").expect("ok");
        assert!(!merge_hook(&mut settings, "topicmux hook").expect("ok"));
        assert_eq!(settings["hooks"]["SessionStart"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn merge_keeps_other_hooks_and_settings() {
        let mut settings = json!({
            "model": "opus",
            "hooks": {
                "SessionStart": [{"hooks": [{"type": "command", "command": "other-tool start"}]}],
                "Stop": [{"hooks": [{"type": "command", "command": "notify"}]}],
            }
        });
        assert!(merge_hook(&mut settings, "topicmux hook").expect("ok"));
        assert_eq!(settings["model"], "opus");
        assert_eq!(settings["hooks"]["SessionStart"].as_array().map(Vec::len), Some(2));
        assert_eq!(settings["hooks"]["Stop"][0]["hooks"][0]["command"], "notify");
    }

    #[test]
    fn detects_installed_hook_by_name_or_path() {
        let installed = |cmd: &str| {
            is_hook_installed(&json!({
                "hooks": {"SessionStart": [{"hooks": [{"type": "command", "command": cmd}]}]}
            }))
        };
        assert!(installed("topicmux hook"));
        assert!(installed("/home/me/.cargo/bin/topicmux hook"));
        assert!(installed("'/path/with spaces/topicmux' hook"));
        assert!(!installed("not-topicmux hook"));
        assert!(!installed("topicmux daemon"));
    }

    #[test]
    fn rejects_non_object_settings() {
        let mut settings = json!([]);
        assert!(merge_hook(&mut settings, "topicmux hook").is_err());
    }

    #[test]
    fn settings_path_scopes() {
        assert_eq!(settings_path("project").expect("ok"), PathBuf::from(".claude/settings.json"));
        assert!(settings_path("user").expect("ok").ends_with(".claude/settings.json"));
        assert!(settings_path("invalid").is_err());
    }

    #[test]
    fn quotes_paths_with_spaces() {
        assert_eq!(shell_quote("/usr/bin/topicmux"), "/usr/bin/topicmux");
        assert_eq!(shell_quote("/my apps/topicmux"), "'/my apps/topicmux'");
        assert_eq!(shell_quote("/it's/topicmux"), "'/it'\\''s/topicmux'");
    }
}
