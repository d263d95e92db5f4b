//! Monitor loop: tmux snapshot → session map → transcript tails → queues.
//!
//! One tick:
//! 1. list windows and read the server epoch,
//! 2. reload the session map and refresh the identity snapshot,
//! 3. re-resolve bindings (skipped while no tmux server is up),
//! 4. diff the session map against the previous tick, dropping tails of
//!    ended sessions and auto-registering new windows,
//! 5. poll every live session's transcript and queue its notifications,
//! 6. fold delivery confirmations into last-read offsets and persist,
//! 7. with the state lock released, create topics for new windows and bind
//!    them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::time::interval;

use topicmux_core::binding::{BindingState, IdTrust, ResolveOutcome};
use topicmux_core::identity::{AutoRegistration, IdentityResolver};
use topicmux_core::types::{Notification, SessionAssociation, TopicKey, Window};
use topicmux_daemon::delivery::QueuedItem;
use topicmux_daemon::persist::{FileLock, atomic_write_json};
use topicmux_source_claude_jsonl::discovery::{
    load_session_map, prune_session_map, resolve_transcript, sync_window_names,
};
use topicmux_source_claude_jsonl::tail::SessionTail;
use topicmux_tmux::{EpochChange, list_windows, read_epoch, to_windows};

use crate::daemon::{Daemon, DaemonState, with_tmux};
use crate::transport::run_blocking;

pub async fn run_monitor(daemon: Arc<Daemon>) {
    let mut ticker = interval(daemon.config.monitor_interval);
    loop {
        ticker.tick().await;
        if let Err(e) = monitor_tick(&daemon).await {
            tracing::warn!("monitor tick error: {e}");
        }
    }
}

pub(crate) async fn monitor_tick(d: &Daemon) -> anyhow::Result<()> {
    let now = Utc::now();
    let session = d.config.tmux_session.clone();
    let (epoch, infos) = with_tmux(&d.runner, move |r| {
        Ok((read_epoch(r, &session)?, list_windows(r, &session)?))
    })
    .await?;
    let associations = load_session_map(&d.config.session_map_path(), &d.config.tmux_session);

    let mut guard = d.state.lock().await;
    let st = &mut *guard;

    let change = st.epoch.observe(epoch);
    if change == EpochChange::Restarted {
        tracing::info!("tmux server restarted, re-resolving bindings by name");
    }
    let trust = match change {
        EpochChange::Unchanged => IdTrust::SameServer,
        _ => IdTrust::NewServer,
    };
    let windows = to_windows(&infos);
    let current = live_associations(&windows, associations, &st.sessions, trust);
    let current_list: Vec<SessionAssociation> = current.values().cloned().collect();
    st.resolver.refresh(windows, &current_list);

    if change != EpochChange::Gone {
        let outcomes = st.bindings.reresolve(&st.resolver, trust)?;
        for outcome in outcomes {
            if let ResolveOutcome::Unresolved { topic, display_name } = outcome {
                let notice = Notification::error(
                    "",
                    format!("Window '{display_name}' is gone. Bind this topic to a window again."),
                );
                d.hub.enqueue(QueuedItem::new(topic, notice, None)).await;
            }
        }
    }

    if !st.started {
        let live: HashSet<&str> = current.values().map(|a| a.session_id.as_str()).collect();
        let dropped = st.offsets.retain_sessions(&live);
        if dropped > 0 {
            tracing::info!(dropped, "dropped offsets of sessions no longer running");
        }
        st.started = true;
    }

    let changes = diff_sessions(&st.sessions, &current);
    for session_id in &changes.ended {
        tracing::info!(session_id, "session ended");
        st.tails.remove(session_id);
        st.offsets.remove_session(session_id);
        d.hub.forget_session(session_id);
    }
    st.sessions = current;
    let mut new_topics = Vec::new();
    for window_id in &changes.started {
        if let Some(pending) = register_window(d, st, window_id, now).await {
            new_topics.push(pending);
        }
    }
    let resolver = &st.resolver;
    let bindings = st.bindings.table();
    st.awaiting_attach
        .retain(|id, _| resolver.find_live(id).is_some() && bindings.lookup_by_window(id).is_none());

    if change != EpochChange::Gone {
        let live_ids: HashSet<&str> = st.resolver.list_live_windows().map(|w| w.window_id.as_str()).collect();
        if let Err(e) = tidy_session_map_file(d, &live_ids, st.sessions.values()) {
            tracing::warn!("failed to update session map: {e}");
        }
    }

    tail_sessions(d, st, now).await;

    while let Ok(delivered) = st.delivered_rx.try_recv() {
        st.bindings.advance_last_read(delivered.topic, delivered.source_offset);
    }
    let saved = st
        .offsets
        .save_if_dirty()
        .and_then(|_| st.bindings.save_if_dirty());
    drop(guard);

    for pending in new_topics {
        create_topic_for(d, pending, now).await;
    }
    saved?;
    Ok(())
}

/// Session-map entries whose window is live and, when the entry names the
/// window, still carries that name. The name check drops entries left over
/// from a previous tmux server whose window id was reused. On the same
/// server a session already tracked in that window survives a rename and
/// takes the window's new name.
fn live_associations(
    windows: &[Window],
    associations: Vec<SessionAssociation>,
    previous: &HashMap<String, SessionAssociation>,
    trust: IdTrust,
) -> HashMap<String, SessionAssociation> {
    associations
        .into_iter()
        .filter_map(|mut a| {
            let w = windows
                .iter()
                .find(|w| w.is_live() && w.window_id == a.window_id)?;
            if a.display_name.is_empty() || w.display_name == a.display_name {
                return Some(a);
            }
            let tracked = previous
                .get(&a.window_id)
                .is_some_and(|p| p.session_id == a.session_id);
            if trust == IdTrust::SameServer && tracked {
                a.display_name = w.display_name.clone();
                return Some(a);
            }
            None
        })
        .map(|a| (a.window_id.clone(), a))
        .collect()
}

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct SessionChanges {
    /// Sessions no longer running in any live window.
    pub ended: Vec<String>,
    /// Windows whose session is new since the last tick.
    pub started: Vec<String>,
}

pub(crate) fn diff_sessions(
    previous: &HashMap<String, SessionAssociation>,
    current: &HashMap<String, SessionAssociation>,
) -> SessionChanges {
    let running: HashSet<&str> = current.values().map(|a| a.session_id.as_str()).collect();
    let mut ended: Vec<String> = previous
        .values()
        .map(|a| a.session_id.as_str())
        .filter(|s| !running.contains(s))
        .map(str::to_string)
        .collect();
    ended.sort();
    ended.dedup();

    let mut started: Vec<String> = current
        .iter()
        .filter(|(window_id, a)| {
            previous
                .get(*window_id)
                .is_none_or(|old| old.session_id != a.session_id)
        })
        .map(|(window_id, _)| window_id.clone())
        .collect();
    started.sort();

    SessionChanges { ended, started }
}

/// A new window whose topic still has to be created.
struct PendingTopic {
    window: Window,
    recipient: i64,
    name: String,
}

/// Bind or park a newly seen window. Topic creation talks to the chat
/// service, so it is handed back to run once the state lock is released.
async fn register_window(
    d: &Daemon,
    st: &mut DaemonState,
    window_id: &str,
    now: DateTime<Utc>,
) -> Option<PendingTopic> {
    let window = st.resolver.find_live(window_id).cloned()?;
    match IdentityResolver::propose_binding(&window, st.bindings.table(), d.config.default_route) {
        AutoRegistration::AlreadyBound(_) => None,
        AutoRegistration::Bind(topic) => {
            bind_new_window(d, st, topic, &window, now).await;
            None
        }
        AutoRegistration::CreateTopic { recipient, name } => Some(PendingTopic {
            window,
            recipient,
            name,
        }),
        AutoRegistration::AwaitingManualAttach => {
            tracing::info!(window_id, name = %window.display_name, "new window awaiting manual attach");
            st.awaiting_attach.insert(window.window_id.clone(), window);
            None
        }
    }
}

async fn create_topic_for(d: &Daemon, pending: PendingTopic, now: DateTime<Utc>) {
    let PendingTopic {
        window,
        recipient,
        name,
    } = pending;
    let topic_name = name.clone();
    let created = run_blocking(&d.transport, move |t| t.create_topic(recipient, &topic_name)).await;

    let mut st = d.state.lock().await;
    let window_id = window.window_id.as_str();
    match created {
        Ok(topic) => {
            tracing::info!(recipient, topic, name, "created topic for new window");
            if st.resolver.find_live(window_id).is_none()
                || st.bindings.table().lookup_by_window(window_id).is_some()
            {
                tracing::info!(window_id, topic, "window closed or bound meanwhile, leaving new topic unbound");
                return;
            }
            bind_new_window(d, &mut st, TopicKey::new(recipient, topic), &window, now).await;
        }
        Err(e) => {
            tracing::warn!(window_id, error = %e, "failed to create topic, awaiting manual attach");
            if st.resolver.find_live(window_id).is_some() {
                st.awaiting_attach.insert(window.window_id.clone(), window);
            }
        }
    }
}

async fn bind_new_window(
    d: &Daemon,
    st: &mut DaemonState,
    topic: TopicKey,
    window: &Window,
    now: DateTime<Utc>,
) {
    if let Err(e) = st.bindings.bind(topic, &window.window_id, &window.display_name, now) {
        tracing::warn!(%topic, error = %e, "failed to persist auto-registered binding");
    }
    d.hub.reopen_topic(topic).await;
}

/// Poll each live session's transcript and queue output for bound topics.
/// Unbound sessions are still tailed so their offsets stay current.
async fn tail_sessions(d: &Daemon, st: &mut DaemonState, now: DateTime<Utc>) {
    let mut sessions: Vec<SessionAssociation> = st.sessions.values().cloned().collect();
    sessions.sort_by(|a, b| a.window_id.cmp(&b.window_id));

    for assoc in sessions {
        let topic = st
            .bindings
            .table()
            .lookup_by_window(&assoc.window_id)
            .filter(|r| r.state == BindingState::Resolved)
            .map(|r| r.topic);

        if !st.tails.contains_key(&assoc.session_id) {
            let Some(path) = resolve_transcript(&assoc, &d.config.projects_dir) else {
                continue;
            };
            st.tails.insert(
                assoc.session_id.clone(),
                SessionTail::new(&assoc.session_id, path, d.config.pending),
            );
        }
        let Some(tail) = st.tails.get_mut(&assoc.session_id) else {
            continue;
        };

        let offset = st.offsets.tracked(tail.transcript());
        let outcome = tail.poll(offset, now);
        if !outcome.evicted.is_empty() {
            d.hub.forget_invocations(&assoc.session_id, &outcome.evicted);
        }
        if outcome.reset {
            tracing::info!(session_id = %assoc.session_id, "transcript truncated, re-reading from start");
        }
        st.offsets
            .set(tail.transcript(), &assoc.session_id, outcome.end_offset, outcome.reset);

        let Some(topic) = topic else {
            continue;
        };
        for tailed in outcome.notifications {
            let item = QueuedItem::new(topic, tailed.notification, Some(tailed.end_offset));
            if !d.hub.enqueue(item).await {
                tracing::debug!(%topic, "topic closed, dropped notification");
            }
        }
    }
}

/// Remove session-map entries for windows that no longer exist and record
/// renames of windows whose session is still running, under the same lock
/// the hook takes.
fn tidy_session_map_file<'a>(
    d: &Daemon,
    live_ids: &HashSet<&str>,
    running: impl IntoIterator<Item = &'a SessionAssociation>,
) -> anyhow::Result<()> {
    let path = d.config.session_map_path();
    let _lock = FileLock::acquire(&d.config.session_map_lock_path())?;
    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    let Ok(Value::Object(mut raw)) = serde_json::from_str::<Value>(&content) else {
        return Ok(());
    };
    let removed = prune_session_map(&mut raw, &d.config.tmux_session, live_ids);
    let renamed = sync_window_names(&mut raw, &d.config.tmux_session, running);
    if removed.is_empty() && renamed.is_empty() {
        return Ok(());
    }
    if !removed.is_empty() {
        tracing::info!(?removed, "pruned stale session map entries");
    }
    if !renamed.is_empty() {
        tracing::info!(?renamed, "recorded renamed windows in session map");
    }
    atomic_write_json(&path, &Value::Object(raw))?;
    Ok(())
}
