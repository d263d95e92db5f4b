//! Error types for the tmux backend.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TmuxError {
    #[error("tmux command failed: {0}")]
    CommandFailed(String),

    /// No tmux server is listening on the socket.
    #[error("no tmux server running")]
    NoServer,

    #[error("tmux target not found: {0}")]
    TargetNotFound(String),

    #[error("failed to parse list-windows line {line_num}: {detail}")]
    ParseError { line_num: usize, detail: String },

    #[error("tmux io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TmuxError {
    /// Classify a non-zero tmux exit by its stderr.
    pub fn from_stderr(code: i32, stderr: &str) -> Self {
        let s = stderr.trim();
        if s.contains("no server running") || s.contains("error connecting to") {
            Self::NoServer
        } else if s.contains("can't find") {
            Self::TargetNotFound(s.to_string())
        } else {
            Self::CommandFailed(format!("exit code {code}: {s}"))
        }
    }

    /// The server or target simply is not there; callers treat this as an
    /// empty snapshot rather than a failure.
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::NoServer | Self::TargetNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_stderr() {
        assert!(matches!(
            TmuxError::from_stderr(1, "no server running on /tmp/tmux-0/default"),
            TmuxError::NoServer
        ));
        assert!(matches!(
            TmuxError::from_stderr(1, "can't find session: topicmux"),
            TmuxError::TargetNotFound(_)
        ));
        let other = TmuxError::from_stderr(2, "bad flag");
        assert!(!other.is_absent());
        assert_eq!(other.to_string(), "tmux command failed: exit code 2: bad flag");
    }
}
