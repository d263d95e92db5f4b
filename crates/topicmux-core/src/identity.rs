//! Identity Resolver: current window snapshot and auto-registration.

use crate::binding::BindingTable;
use crate::types::{RouteTarget, SessionAssociation, TopicKey, Window};

/// Snapshot of the windows in the current tmux epoch, joined with the
/// hook-written session associations.
#[derive(Debug, Default, Clone)]
pub struct IdentityResolver {
    windows: Vec<Window>,
}

/// Decision for a newly seen window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoRegistration {
    AlreadyBound(TopicKey),
    /// Bind straight to a pre-configured topic.
    Bind(TopicKey),
    /// Create a new topic under `recipient`, then bind.
    CreateTopic { recipient: i64, name: String },
    /// Cold start: no route and no bindings anywhere.
    AwaitingManualAttach,
}

impl IdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot. `current_session_id` is filled from the
    /// associations keyed by window id.
    pub fn refresh(&mut self, mut windows: Vec<Window>, associations: &[SessionAssociation]) {
        for w in &mut windows {
            if let Some(a) = associations.iter().find(|a| a.window_id == w.window_id) {
                w.current_session_id = Some(a.session_id.clone());
            }
        }
        self.windows = windows;
    }

    pub fn windows(&self) -> &[Window] {
        &self.windows
    }

    pub fn list_live_windows(&self) -> impl Iterator<Item = &Window> {
        self.windows.iter().filter(|w| w.is_live())
    }

    pub fn find_live(&self, window_id: &str) -> Option<&Window> {
        self.list_live_windows().find(|w| w.window_id == window_id)
    }

    pub fn find_window_for_session(&self, session_id: &str) -> Option<&Window> {
        self.list_live_windows()
            .find(|w| w.current_session_id.as_deref() == Some(session_id))
    }

    /// Find the live window carrying `display_name`.
    ///
    /// Returns `None` when zero or several live windows share the name; an
    /// ambiguous match is left for a human to attach.
    pub fn resolve_stale(&self, display_name: &str) -> Option<&Window> {
        let mut matches = self
            .list_live_windows()
            .filter(|w| w.display_name == display_name);
        let first = matches.next()?;
        if matches.next().is_some() {
            return None;
        }
        Some(first)
    }

    /// Decide what to do with a window that has a session but may have no
    /// binding.
    ///
    /// An explicit route wins. Without one, a window goes to the first
    /// recipient that already has bindings. With neither, the window stays
    /// unbound until attached by hand.
    pub fn propose_binding(
        window: &Window,
        bindings: &BindingTable,
        default_route: Option<RouteTarget>,
    ) -> AutoRegistration {
        if let Some(r) = bindings.lookup_by_window(&window.window_id) {
            return AutoRegistration::AlreadyBound(r.topic);
        }

        let recipient = match default_route {
            Some(RouteTarget {
                recipient,
                topic: Some(topic),
            }) => {
                let key = TopicKey::new(recipient, topic);
                if bindings.lookup_by_topic(key).is_none() {
                    return AutoRegistration::Bind(key);
                }
                recipient
            }
            Some(RouteTarget {
                recipient,
                topic: None,
            }) => recipient,
            None => match bindings.recipients().first() {
                Some(r) => *r,
                None => return AutoRegistration::AwaitingManualAttach,
            },
        };

        AutoRegistration::CreateTopic {
            recipient,
            name: window.display_name.clone(),
        }
    }
}
