//! topicmux-source-claude-jsonl: Claude Code transcript source.
//! Tails JSONL transcripts by byte offset, translates lines into domain
//! records, and discovers which transcript belongs to which tmux window.

pub mod discovery;
pub mod reader;
pub mod tail;
pub mod translate;

pub use topicmux_core::types;
