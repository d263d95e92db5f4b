//! Daemon wiring: shared state, task startup and shutdown.
//!
//! One `Daemon` is shared by the monitor loop, the status loop, the delivery
//! workers and the UDS server. Session and binding state sits behind a single
//! tokio mutex; each recipient's queue has its own lock inside the hub.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};

use topicmux_core::identity::IdentityResolver;
use topicmux_core::types::{SessionAssociation, Window};
use topicmux_daemon::binding_store::BindingStore;
use topicmux_daemon::offset_store::OffsetStore;
use topicmux_daemon::persist::ensure_state_dir;
use topicmux_daemon::status_board::StatusBoard;
use topicmux_source_claude_jsonl::tail::SessionTail;
use topicmux_tmux::{EpochTracker, TmuxCommandRunner, TmuxExecutor};

use crate::config::Config;
use crate::delivery::{Delivered, DeliveryHub};
use crate::transport::{NdjsonTransport, Transport};
use crate::{monitor, server, status_loop};

/// Mutable session and binding state, owned by the monitor loop and the
/// control server.
pub struct DaemonState {
    pub resolver: IdentityResolver,
    pub bindings: BindingStore,
    pub offsets: OffsetStore,
    pub epoch: EpochTracker,
    /// Per-session tail drivers, keyed by session id.
    pub tails: HashMap<String, SessionTail>,
    /// Session map as of the last tick, keyed by window id (live windows only).
    pub sessions: HashMap<String, SessionAssociation>,
    /// Live windows with no binding and no route to create one.
    pub awaiting_attach: BTreeMap<String, Window>,
    /// Delivery confirmations for last-read tracking.
    pub delivered_rx: mpsc::UnboundedReceiver<Delivered>,
    /// Startup cleanup has run.
    pub started: bool,
}

impl DaemonState {
    /// Session running in `window_id`, per the last session map.
    pub fn session_for_window(&self, window_id: &str) -> Option<&str> {
        self.sessions.get(window_id).map(|a| a.session_id.as_str())
    }
}

pub struct Daemon {
    pub config: Config,
    pub state: Mutex<DaemonState>,
    pub hub: DeliveryHub,
    pub status: Mutex<StatusBoard>,
    pub runner: Arc<dyn TmuxCommandRunner>,
    pub transport: Arc<dyn Transport>,
}

impl Daemon {
    /// Load persisted state and build the shared context. Fails only when
    /// the state directory is unusable.
    pub fn new(
        config: Config,
        runner: Arc<dyn TmuxCommandRunner>,
        transport: Arc<dyn Transport>,
    ) -> anyhow::Result<Arc<Self>> {
        ensure_state_dir(&config.state_dir)?;

        let (delivered_tx, delivered_rx) = mpsc::unbounded_channel();
        let state = DaemonState {
            resolver: IdentityResolver::new(),
            bindings: BindingStore::load(config.bindings_path()),
            offsets: OffsetStore::load(config.offsets_path()),
            epoch: EpochTracker::new(),
            tails: HashMap::new(),
            sessions: HashMap::new(),
            awaiting_attach: BTreeMap::new(),
            delivered_rx,
            started: false,
        };
        tracing::info!(
            state_dir = %config.state_dir.display(),
            bindings = state.bindings.table().len(),
            offsets = state.offsets.len(),
            "loaded state"
        );

        Ok(Arc::new(Self {
            hub: DeliveryHub::new(config.queue, Arc::clone(&transport), delivered_tx),
            config,
            state: Mutex::new(state),
            status: Mutex::new(StatusBoard::new()),
            runner,
            transport,
        }))
    }
}

/// Run a blocking tmux operation off the async threads.
pub(crate) async fn with_tmux<T, F>(runner: &Arc<dyn TmuxCommandRunner>, f: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Arc<dyn TmuxCommandRunner>) -> Result<T, topicmux_tmux::TmuxError> + Send + 'static,
{
    let runner = Arc::clone(runner);
    Ok(tokio::task::spawn_blocking(move || f(&runner)).await??)
}

/// Run the daemon: monitor loop, status loop and UDS server until a
/// shutdown signal.
pub async fn run_daemon(config: Config) -> anyhow::Result<()> {
    let runner: Arc<dyn TmuxCommandRunner> = Arc::new(build_executor(&config));
    let transport: Arc<dyn Transport> = match &config.outbox {
        Some(path) => Arc::new(NdjsonTransport::open(path)?),
        None => Arc::new(NdjsonTransport::stdout()),
    };
    let socket_path = config.socket_path.clone();
    let daemon = Daemon::new(config, runner, transport)?;

    let server_daemon = Arc::clone(&daemon);
    let server_socket = socket_path.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server::run_server(&server_socket, server_daemon).await {
            tracing::error!("UDS server error: {e}");
        }
    });

    let monitor_handle = tokio::spawn(monitor::run_monitor(Arc::clone(&daemon)));
    let status_handle = tokio::spawn(status_loop::run_status_loop(Arc::clone(&daemon)));

    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => tokio::select! {
                    _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                },
                Err(e) => {
                    tracing::warn!("failed to register SIGTERM handler: {e}");
                    ctrl_c.await.ok();
                    tracing::info!("received ctrl-c, shutting down");
                }
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            tracing::info!("received ctrl-c, shutting down");
        }
    };

    tokio::select! {
        () = shutdown => {}
        _ = monitor_handle => tracing::warn!("monitor loop exited unexpectedly"),
        _ = status_handle => tracing::warn!("status loop exited unexpectedly"),
        _ = server_handle => tracing::warn!("server exited unexpectedly"),
    }

    {
        let mut st = daemon.state.lock().await;
        if let Err(e) = st.offsets.save_if_dirty() {
            tracing::warn!("failed to save offsets on shutdown: {e}");
        }
        if let Err(e) = st.bindings.save_if_dirty() {
            tracing::warn!("failed to save bindings on shutdown: {e}");
        }
    }

    let _ = std::fs::remove_file(&socket_path);
    tracing::info!("daemon stopped");
    Ok(())
}

pub(crate) fn build_executor(config: &Config) -> TmuxExecutor {
    tmux_executor(config.tmux_socket.as_deref())
}

pub(crate) fn tmux_executor(socket: Option<&str>) -> TmuxExecutor {
    let executor = TmuxExecutor::default();
    match socket {
        Some(path) => executor.with_socket_path(path),
        None => executor,
    }
}
