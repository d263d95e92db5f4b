//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "topicmux", about = "Bridge chat topics to Claude sessions in tmux", version)]
pub struct Cli {
    /// UDS socket path (default: $XDG_RUNTIME_DIR/topicmux/topicmux.sock)
    #[arg(long, short = 's', global = true, env = "TOPICMUX_SOCKET")]
    pub socket_path: Option<String>,

    /// State directory (default: ~/.topicmux)
    #[arg(long, global = true, env = "TOPICMUX_DIR")]
    pub state_dir: Option<PathBuf>,

    /// tmux session holding the managed windows
    #[arg(long, global = true, env = "TOPICMUX_TMUX_SESSION", default_value = "topicmux")]
    pub tmux_session: String,

    /// tmux server socket path
    #[arg(long, global = true, env = "TOPICMUX_TMUX_SOCKET_PATH")]
    pub tmux_socket: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the daemon (monitor, status loop, delivery workers, UDS server)
    Daemon(DaemonOpts),
    /// Claude SessionStart hook: record the session for this tmux window
    Hook,
    /// Install the SessionStart hook into Claude settings
    SetupHook(SetupHookOpts),
    /// List windows in the managed tmux session
    ListWindows,
    /// List topic bindings
    ListBindings,
    /// Bind a topic to a window
    Bind(BindOpts),
    /// Remove a topic binding
    Unbind(TopicOpts),
    /// Close a topic: unbind, drop queued output and pending tool calls
    CloseTopic(TopicOpts),
    /// Kill a window and close its topic
    KillWindow(KillWindowOpts),
    /// Type text into the window bound to a topic
    Send(SendOpts),
    /// Create a window running in a directory
    CreateWindow(CreateWindowOpts),
    /// Show daemon status and windows awaiting manual attach
    Status,
}

#[derive(Args, Clone, Debug)]
pub struct DaemonOpts {
    /// Transcript and session-map poll interval in milliseconds
    #[arg(long, env = "TOPICMUX_MONITOR_INTERVAL_MS", default_value = "2000")]
    pub monitor_interval_ms: u64,

    /// Terminal status poll interval in milliseconds
    #[arg(long, env = "TOPICMUX_STATUS_INTERVAL_MS", default_value = "1000")]
    pub status_interval_ms: u64,

    /// Minimum interval between sends to one recipient, in milliseconds
    #[arg(long, env = "TOPICMUX_SEND_INTERVAL_MS", default_value = "1100")]
    pub send_interval_ms: u64,

    /// Largest merged text, in characters
    #[arg(long, env = "TOPICMUX_MERGE_CEILING", default_value = "3800")]
    pub merge_ceiling: usize,

    /// Seconds before an unanswered tool call is evicted
    #[arg(long, env = "TOPICMUX_PENDING_TIMEOUT_SECS", default_value = "3600")]
    pub pending_timeout_secs: u64,

    /// What to do with a result whose tool call was evicted: standalone or drop
    #[arg(long, env = "TOPICMUX_LATE_RESULTS", default_value = "standalone")]
    pub late_results: String,

    /// Where new windows go: <recipient> or <recipient>:<topic>
    #[arg(long, env = "TOPICMUX_DEFAULT_ROUTE")]
    pub default_route: Option<String>,

    /// Claude projects directory (default: ~/.claude/projects)
    #[arg(long, env = "TOPICMUX_PROJECTS_DIR")]
    pub projects_dir: Option<PathBuf>,

    /// Append outbound messages to this file instead of stdout
    #[arg(long, env = "TOPICMUX_OUTBOX")]
    pub outbox: Option<PathBuf>,
}

impl Default for DaemonOpts {
    fn default() -> Self {
        Self {
            monitor_interval_ms: 2000,
            status_interval_ms: 1000,
            send_interval_ms: 1100,
            merge_ceiling: 3800,
            pending_timeout_secs: 3600,
            late_results: "standalone".to_string(),
            default_route: None,
            projects_dir: None,
            outbox: None,
        }
    }
}

#[derive(Args)]
pub struct SetupHookOpts {
    /// "user" (~/.claude/settings.json) or "project" (.claude/settings.json)
    #[arg(long, default_value = "user")]
    pub scope: String,

    /// Command to run as the hook (default: this executable + " hook")
    #[arg(long)]
    pub command: Option<String>,
}

#[derive(Args)]
pub struct TopicOpts {
    /// Topic as <recipient>:<topic>
    pub topic: String,
}

#[derive(Args)]
pub struct BindOpts {
    /// Topic as <recipient>:<topic>
    pub topic: String,

    /// Window id such as @3
    #[arg(long, conflicts_with = "name", required_unless_present = "name")]
    pub window: Option<String>,

    /// Window display name
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Args)]
pub struct KillWindowOpts {
    pub window_id: String,
}

#[derive(Args)]
pub struct SendOpts {
    /// Topic as <recipient>:<topic>
    pub topic: String,

    pub text: String,

    /// Type the text without pressing Enter
    #[arg(long)]
    pub no_enter: bool,
}

#[derive(Args)]
pub struct CreateWindowOpts {
    /// Working directory for the new window
    pub cwd: String,

    #[arg(long)]
    pub name: Option<String>,

    /// Bind the new window to <recipient>:<topic>
    #[arg(long)]
    pub topic: Option<String>,
}

/// Default socket path using $USER for per-user isolation.
pub fn default_socket_path() -> String {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return format!("{dir}/topicmux/topicmux.sock");
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    format!("/tmp/topicmux-{user}/topicmux.sock")
}
