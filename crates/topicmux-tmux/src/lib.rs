//! topicmux-tmux: tmux IO boundary.
//! Subprocess execution, window listing, capture/send-keys/kill/new-window,
//! and server epoch tracking. No routing or delivery logic lives here.

pub mod control;
pub mod epoch;
pub mod error;
pub mod executor;
pub mod snapshot;
pub mod window_info;

pub use control::{
    capture_window, display_message, ensure_session, kill_window, new_window, send_enter,
    send_keys, send_special_key, unique_window_name,
};
pub use epoch::{EpochChange, EpochTracker, TmuxEpoch, read_epoch};
pub use error::TmuxError;
pub use executor::{TmuxCommandRunner, TmuxExecutor};
pub use snapshot::{agent_running, to_window, to_windows};
pub use window_info::{LIST_WINDOWS_FORMAT, TmuxWindowInfo, list_windows, parse_list_windows_output};
