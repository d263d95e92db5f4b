//! Status-line parsing from captured pane text.

/// Spinner glyphs drawn in front of the working-status text.
pub const STATUS_SPINNERS: &[char] = &['·', '✻', '✽', '✶', '✳', '✢'];

/// Commands that mean the agent has exited and the pane fell back to a shell.
pub const SHELL_COMMANDS: &[&str] = &[
    "zsh", "bash", "fish", "sh", "csh", "tcsh", "ksh", "dash", "nu", "pwsh",
];

/// Minimum width of a chrome separator line.
const SEPARATOR_MIN_CHARS: usize = 20;

/// Only the bottom of the pane is searched for the separator.
const SEPARATOR_SEARCH_LINES: usize = 10;

/// Non-blank lines above the separator checked for a spinner.
const STATUS_LOOKBACK_LINES: usize = 4;

pub fn is_shell_command(cmd: &str) -> bool {
    let base = cmd.rsplit('/').next().unwrap_or(cmd).trim_start_matches('-');
    SHELL_COMMANDS.contains(&base.to_ascii_lowercase().as_str())
}

fn is_separator(line: &str) -> bool {
    let t = line.trim();
    t.chars().count() >= SEPARATOR_MIN_CHARS && t.chars().all(|c| c == '─')
}

/// Extract the working-status text, e.g. `Reading files… (3s)`.
///
/// The status line sits just above the topmost `────` separator among the
/// last few lines. Only the first non-blank line above it is considered, so
/// `·` bullets further up in ordinary output never match.
pub fn parse_status_line(pane_text: &str) -> Option<String> {
    let lines: Vec<&str> = pane_text.split('\n').collect();
    let start = lines.len().saturating_sub(SEPARATOR_SEARCH_LINES);
    let sep = (start..lines.len()).find(|&i| is_separator(lines[i]))?;

    let line = lines[..sep]
        .iter()
        .rev()
        .take(STATUS_LOOKBACK_LINES)
        .map(|l| l.trim())
        .find(|l| !l.is_empty())?;

    let mut chars = line.chars();
    let first = chars.next()?;
    if STATUS_SPINNERS.contains(&first) {
        Some(chars.as_str().trim().to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sep() -> String {
        "─".repeat(40)
    }

    #[test]
    fn finds_spinner_above_separator() {
        let pane = format!(
            "· a bullet in output\nsome text\n\n✻ Reading files… (3s · esc to interrupt)\n\n{}\n❯ \n{}\n  status bar",
            sep(),
            sep()
        );
        assert_eq!(
            parse_status_line(&pane).as_deref(),
            Some("Reading files… (3s · esc to interrupt)")
        );
    }

    #[test]
    fn non_spinner_line_above_separator_means_idle() {
        let pane = format!("· bullet\nDone.\n{}\n❯ ", sep());
        assert_eq!(parse_status_line(&pane), None);
    }

    #[test]
    fn no_separator_no_status() {
        assert_eq!(parse_status_line("✻ Working\nplain"), None);
        assert_eq!(parse_status_line(""), None);
    }

    #[test]
    fn short_dash_line_is_not_a_separator() {
        let pane = format!("✻ Working\n{}", "─".repeat(5));
        assert_eq!(parse_status_line(&pane), None);
    }

    #[test]
    fn shell_detection() {
        assert!(is_shell_command("zsh"));
        assert!(is_shell_command("-bash"));
        assert!(is_shell_command("/bin/sh"));
        assert!(!is_shell_command("claude"));
        assert!(!is_shell_command("node"));
    }
}
