//! Convert tmux window listings into domain windows.

use topicmux_core::status::is_shell_command;
use topicmux_core::types::{Liveness, Window};

use crate::window_info::TmuxWindowInfo;

/// A window exists for identity purposes as long as its pane is alive, even
/// if the agent inside exited; see [`agent_running`] for that.
pub fn to_window(info: &TmuxWindowInfo) -> Window {
    let liveness = if info.pane_dead {
        Liveness::Dead
    } else {
        Liveness::Live
    };
    Window {
        window_id: info.window_id.clone(),
        display_name: info.window_name.clone(),
        cwd: info.current_path.clone(),
        current_command: info.current_cmd.clone(),
        current_session_id: None,
        liveness,
    }
}

/// The pane is alive and not sitting at a plain shell prompt.
pub fn agent_running(window: &Window) -> bool {
    window.is_live() && !is_shell_command(&window.current_command)
}

pub fn to_windows(infos: &[TmuxWindowInfo]) -> Vec<Window> {
    infos.iter().map(to_window).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(cmd: &str, dead: bool) -> TmuxWindowInfo {
        TmuxWindowInfo {
            session_name: "topicmux".into(),
            window_id: "@1".into(),
            window_name: "alpha".into(),
            current_cmd: cmd.into(),
            current_path: "/work".into(),
            pane_dead: dead,
            active: true,
            pane_pid: None,
        }
    }

    #[test]
    fn agent_window_is_live() {
        let w = to_window(&info("claude", false));
        assert_eq!(w.liveness, Liveness::Live);
        assert_eq!(w.display_name, "alpha");
        assert_eq!(w.cwd, "/work");
    }

    #[test]
    fn dead_pane_is_dead() {
        assert_eq!(to_window(&info("claude", true)).liveness, Liveness::Dead);
    }

    #[test]
    fn shell_window_is_live_but_agent_not_running() {
        let w = to_window(&info("zsh", false));
        assert_eq!(w.liveness, Liveness::Live);
        assert!(!agent_running(&w));
        assert!(agent_running(&to_window(&info("claude", false))));
    }
}
