//! Pure domain layer for topicmux.
//!
//! Everything here is synchronous and free of IO: the Event Reconciler, the
//! topic/window binding table, the identity resolver and the status-line
//! parser. Callers feed snapshots and records in and get decisions out.

pub mod binding;
pub mod identity;
pub mod reconcile;
pub mod status;
pub mod summary;
pub mod types;
