//! Status loop: terminal status line of each bound window → its topic.
//!
//! Captures the visible pane of every resolved, live binding, parses the
//! spinner line Claude draws while working, and keeps one status message per
//! topic in sync with it (sent, edited in place, deleted when idle).

use std::sync::Arc;

use tokio::time::interval;

use topicmux_core::binding::BindingState;
use topicmux_core::status::parse_status_line;
use topicmux_core::types::{TopicKey, Window};
use topicmux_daemon::delivery::MessageId;
use topicmux_daemon::status_board::{PendingStatus, StatusUpdate};
use topicmux_tmux::{agent_running, capture_window};

use crate::daemon::{Daemon, with_tmux};
use crate::transport::{TransportError, run_blocking};

pub async fn run_status_loop(daemon: Arc<Daemon>) {
    let mut ticker = interval(daemon.config.status_interval);
    loop {
        ticker.tick().await;
        if let Err(e) = status_tick(&daemon).await {
            tracing::warn!("status tick error: {e}");
        }
    }
}

pub(crate) async fn status_tick(d: &Daemon) -> anyhow::Result<()> {
    let targets: Vec<(TopicKey, Window)> = {
        let st = d.state.lock().await;
        st.bindings
            .table()
            .records()
            .filter(|r| r.state == BindingState::Resolved)
            .filter_map(|r| st.resolver.find_live(&r.window_id).map(|w| (r.topic, w.clone())))
            .collect()
    };

    for (topic, window) in targets {
        let status = if agent_running(&window) {
            let window_id = window.window_id.clone();
            match with_tmux(&d.runner, move |r| capture_window(r, &window_id)).await {
                Ok(text) => parse_status_line(&text),
                Err(e) => {
                    tracing::debug!(%topic, window_id = %window.window_id, "capture failed: {e}");
                    continue;
                }
            }
        } else {
            None
        };
        d.status.lock().await.publish(topic, status);
    }

    flush_status(d).await;
    Ok(())
}

/// Push pending status changes to the transport. A failed update stays
/// unconfirmed and is retried when the next tick publishes again.
pub(crate) async fn flush_status(d: &Daemon) {
    let pending = d.status.lock().await.take_pending();
    for p in pending {
        match apply_update(d, &p).await {
            Ok(message_id) => d.status.lock().await.confirm(p.topic, &p.update, message_id),
            Err(e) => tracing::warn!(topic = %p.topic, "status update failed: {e}"),
        }
    }
}

async fn apply_update(d: &Daemon, p: &PendingStatus) -> Result<Option<MessageId>, TransportError> {
    let topic = p.topic;
    match (&p.update, p.message_id) {
        (StatusUpdate::Set(text), Some(id)) => {
            let text = text.clone();
            run_blocking(&d.transport, move |t| t.edit(topic, id, &text)).await?;
            Ok(Some(id))
        }
        (StatusUpdate::Set(text), None) => {
            let text = text.clone();
            run_blocking(&d.transport, move |t| t.send(topic, &text))
                .await
                .map(Some)
        }
        (StatusUpdate::Clear, Some(id)) => {
            run_blocking(&d.transport, move |t| t.delete(topic, id)).await?;
            Ok(None)
        }
        (StatusUpdate::Clear, None) => Ok(None),
    }
}
