//! `topicmux hook`: Claude SessionStart hook.
//!
//! Claude runs this inside the tmux pane it starts in and passes the hook
//! payload on stdin. The hook records which session runs in which window in
//! `session_map.json`, the file the daemon's monitor reads. It never fails
//! the Claude session: every problem is logged and skipped.

use std::io::Read;
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};

use topicmux_daemon::persist::{FileLock, atomic_write_json};
use topicmux_source_claude_jsonl::discovery::{SessionMapEntry, session_map_key};
use topicmux_tmux::{TmuxCommandRunner, display_message};

use crate::config::{session_map_lock_path, session_map_path};

const WINDOW_FORMAT: &str = "#{session_name}:#{window_id}:#{window_name}";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct HookPayload {
    pub session_id: String,
    pub cwd: String,
    pub transcript_path: String,
    pub hook_event_name: String,
}

/// Why a payload was not recorded.
#[derive(Debug, PartialEq, Eq)]
pub enum Skip {
    Empty,
    NotSessionStart(String),
    BadSessionId(String),
    RelativeCwd(String),
    NoPane,
    BadWindowInfo(String),
}

impl std::fmt::Display for Skip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("empty session_id or event"),
            Self::NotSessionStart(e) => write!(f, "ignoring {e} event"),
            Self::BadSessionId(s) => write!(f, "invalid session_id format: {s}"),
            Self::RelativeCwd(c) => write!(f, "cwd is not absolute: {c}"),
            Self::NoPane => f.write_str("TMUX_PANE not set, cannot determine window"),
            Self::BadWindowInfo(out) => write!(f, "unexpected tmux window info: {out:?}"),
        }
    }
}

/// Window the hook runs in, as reported by tmux.
#[derive(Debug, PartialEq, Eq)]
pub struct PaneWindow {
    pub session: String,
    pub window_id: String,
    pub window_name: String,
}

/// Session ids are lowercase hyphenated UUIDs.
pub fn is_session_uuid(s: &str) -> bool {
    uuid::Uuid::parse_str(s).is_ok_and(|u| u.hyphenated().to_string() == s)
}

pub fn validate(payload: &HookPayload) -> Result<(), Skip> {
    if payload.session_id.is_empty() || payload.hook_event_name.is_empty() {
        return Err(Skip::Empty);
    }
    if !is_session_uuid(&payload.session_id) {
        return Err(Skip::BadSessionId(payload.session_id.clone()));
    }
    if !payload.cwd.is_empty() && !Path::new(&payload.cwd).is_absolute() {
        return Err(Skip::RelativeCwd(payload.cwd.clone()));
    }
    if payload.hook_event_name != "SessionStart" {
        return Err(Skip::NotSessionStart(payload.hook_event_name.clone()));
    }
    Ok(())
}

/// Parse `session:@id:name`. The window name may itself contain colons.
pub fn parse_pane_window(output: &str) -> Option<PaneWindow> {
    let mut parts = output.trim().splitn(3, ':');
    let session = parts.next()?;
    let window_id = parts.next()?;
    let window_name = parts.next()?;
    if session.is_empty() || !window_id.starts_with('@') {
        return None;
    }
    Some(PaneWindow {
        session: session.to_string(),
        window_id: window_id.to_string(),
        window_name: window_name.to_string(),
    })
}

/// Insert `entry` under the `session:window_id` key and drop the legacy
/// `session:window_name` key for the same window.
pub fn upsert_entry(
    map: &mut Map<String, Value>,
    window: &PaneWindow,
    entry: &SessionMapEntry,
) -> anyhow::Result<()> {
    let key = session_map_key(&window.session, &window.window_id);
    let legacy = session_map_key(&window.session, &window.window_name);
    map.insert(key.clone(), serde_json::to_value(entry)?);
    if legacy != key && map.remove(&legacy).is_some() {
        tracing::info!(key = %legacy, "removed old-format session map key");
    }
    Ok(())
}

/// Handle one hook invocation. `Ok(Err(skip))` means the payload was valid
/// JSON but not recorded.
pub fn run_hook(
    state_dir: &Path,
    runner: &impl TmuxCommandRunner,
    pane: Option<&str>,
    input: impl Read,
) -> anyhow::Result<Result<PaneWindow, Skip>> {
    let payload: HookPayload = serde_json::from_reader(input)?;
    if let Err(skip) = validate(&payload) {
        return Ok(Err(skip));
    }
    let Some(pane) = pane.filter(|p| !p.is_empty()) else {
        return Ok(Err(Skip::NoPane));
    };

    let out = display_message(runner, pane, WINDOW_FORMAT)?;
    let Some(window) = parse_pane_window(&out) else {
        return Ok(Err(Skip::BadWindowInfo(out)));
    };

    let entry = SessionMapEntry {
        session_id: payload.session_id,
        cwd: payload.cwd,
        window_name: window.window_name.clone(),
        transcript_path: Some(payload.transcript_path).filter(|p| !p.is_empty()),
    };

    let path = session_map_path(state_dir);
    let _lock = FileLock::acquire(&session_map_lock_path(state_dir))?;
    let mut map: Map<String, Value> = match std::fs::read_to_string(&path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), "session map is corrupt, starting over: {e}");
            Map::new()
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
        Err(e) => return Err(e.into()),
    };
    upsert_entry(&mut map, &window, &entry)?;
    atomic_write_json(&path, &Value::Object(map))?;

    tracing::debug!(
        session_id = %entry.session_id,
        window_id = %window.window_id,
        window_name = %window.window_name,
        "recorded session"
    );
    Ok(Ok(window))
}

#[cfg(test)]
mod tests {
    use super::*;
    use topicmux_tmux::TmuxError;

    const SID: &str = "0a1b2c3d-4e5f-6071-8293-a4b5c6d7e8f9";

    struct Pane(&'static str);

    impl TmuxCommandRunner for Pane {
        fn run(&self, args: &[&str]) -> Result<String, TmuxError> {
            match args.first() {
                Some(&"display-message") => Ok(format!("{}\n", self.0)),
                _ => Err(TmuxError::CommandFailed(format!("unexpected command: {args:?}"))),
            }
        }
    }

    fn payload(event: &str) -> String {
        serde_json::json!({
            "session_id": SID,
            "cwd": "/work/api",
            "transcript_path": "/home/me/.claude/projects/-work-api/x.jsonl",
            "hook_event_name": event,
        })
        .to_string()
    }

    #[test]
    fn uuid_format() {
        assert!(is_session_uuid(SID));
        assert!(!is_session_uuid("0A1B2C3D-4e5f-6071-8293-a4b5c6d7e8f9"));
        assert!(!is_session_uuid("not-a-uuid"));
        assert!(!is_session_uuid("0a1b2c3d4e5f60718293a4b5c6d7e8f9"));
        assert!(!is_session_uuid("{0a1b2c3d-4e5f-6071-8293-a4b5c6d7e8f9}"));
        assert!(!is_session_uuid("urn:uuid:0a1b2c3d-4e5f-6071-8293-a4b5c6d7e8f9"));
        assert!(!is_session_uuid("0a1b2c3d-4e5f-6071-8293-a4b5c6d7e8fg"));
    }

    #[test]
    fn validation() {
        let mut p = HookPayload {
            session_id: SID.into(),
            cwd: "/work".into(),
            transcript_path: String::new(),
            hook_event_name: "SessionStart".into(),
        };
        assert_eq!(validate(&p), Ok(()));

        p.cwd = "relative/dir".into();
        assert!(matches!(validate(&p), Err(Skip::RelativeCwd(_))));

        p.cwd = String::new();
        p.hook_event_name = "Stop".into();
        assert!(matches!(validate(&p), Err(Skip::NotSessionStart(_))));

        p.session_id = String::new();
        assert_eq!(validate(&p), Err(Skip::Empty));
    }

    #[test]
    fn window_names_may_contain_colons() {
        let w = parse_pane_window("topicmux:@4:api:v2\n").expect("test");
        assert_eq!(w.session, "topicmux");
        assert_eq!(w.window_id, "@4");
        assert_eq!(w.window_name, "api:v2");
        assert_eq!(parse_pane_window("topicmux:@4"), None);
        assert_eq!(parse_pane_window("topicmux:4:api"), None);
    }

    #[test]
    fn records_session_and_drops_legacy_key() {
        let dir = tempfile::tempdir().expect("test");
        std::fs::write(
            session_map_path(dir.path()),
            serde_json::json!({
                "topicmux:api": {"session_id": "old", "cwd": "/work/api", "window_name": "api"},
                "other:@1": {"session_id": "keep", "cwd": "/x", "window_name": "x"},
            })
            .to_string(),
        )
        .expect("test");

        let out = run_hook(
            dir.path(),
            &Pane("topicmux:@4:api"),
            Some("%7"),
            payload("SessionStart").as_bytes(),
        )
        .expect("test");
        assert!(out.is_ok());

        let raw: Value = serde_json::from_str(
            &std::fs::read_to_string(session_map_path(dir.path())).expect("test"),
        )
        .expect("test");
        assert_eq!(raw["topicmux:@4"]["session_id"], SID);
        assert_eq!(raw["topicmux:@4"]["window_name"], "api");
        assert_eq!(
            raw["topicmux:@4"]["transcript_path"],
            "/home/me/.claude/projects/-work-api/x.jsonl"
        );
        assert!(raw.get("topicmux:api").is_none());
        assert_eq!(raw["other:@1"]["session_id"], "keep");
    }

    #[test]
    fn skips_without_pane_or_for_other_events() {
        let dir = tempfile::tempdir().expect("test");
        let out = run_hook(dir.path(), &Pane("s:@1:w"), None, payload("SessionStart").as_bytes())
            .expect("test");
        assert_eq!(out.err(), Some(Skip::NoPane));

        let out = run_hook(dir.path(), &Pane("s:@1:w"), Some("%1"), payload("Stop").as_bytes())
            .expect("test");
        assert!(matches!(out, Err(Skip::NotSessionStart(_))));
        assert!(!session_map_path(dir.path()).exists());
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().expect("test");
        assert!(run_hook(dir.path(), &Pane("s:@1:w"), Some("%1"), &b"{nope"[..]).is_err());
    }
}
