//! topicmux-daemon: durable state and delivery policy.
//!
//! Offset and binding stores persisted as atomic JSON, the per-recipient
//! delivery queue with merge and rate-limit rules, and the supersede-only
//! status board. Everything here is synchronous; the runtime crate drives it
//! from tokio tasks.

pub mod binding_store;
pub mod delivery;
pub mod error;
pub mod offset_store;
pub mod persist;
pub mod status_board;

pub use error::StoreError;
pub use topicmux_core::types;
