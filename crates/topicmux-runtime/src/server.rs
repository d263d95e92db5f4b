//! UDS JSON-RPC server: minimal hand-rolled implementation.
//! Connection-per-request, newline-delimited JSON.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;

use topicmux_core::binding::BindingState;
use topicmux_core::types::{TopicKey, Window};
use topicmux_tmux::{
    ensure_session, kill_window, list_windows, new_window, send_enter, send_keys, unique_window_name,
};

use crate::daemon::{Daemon, with_tmux};
use crate::transport::run_blocking;

/// Pause between typing text and pressing Enter, so the two are not read as
/// one paste.
const ENTER_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum RpcError {
    MethodNotFound,
    InvalidParams(String),
    Failed(String),
}

impl RpcError {
    fn code(&self) -> i64 {
        match self {
            Self::MethodNotFound => -32601,
            Self::InvalidParams(_) => -32602,
            Self::Failed(_) => -32000,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::MethodNotFound => "method not found".to_string(),
            Self::InvalidParams(m) | Self::Failed(m) => m.clone(),
        }
    }
}

impl From<anyhow::Error> for RpcError {
    fn from(e: anyhow::Error) -> Self {
        Self::Failed(e.to_string())
    }
}

impl From<topicmux_daemon::StoreError> for RpcError {
    fn from(e: topicmux_daemon::StoreError) -> Self {
        Self::Failed(e.to_string())
    }
}

/// Run the UDS JSON-RPC server.
pub async fn run_server(socket_path: &str, daemon: Arc<Daemon>) -> anyhow::Result<()> {
    let socket_dir = Path::new(socket_path)
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid socket path"))?;

    std::fs::create_dir_all(socket_dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_dir, std::fs::Permissions::from_mode(0o700))?;
    }

    if Path::new(socket_path).exists() {
        if tokio::net::UnixStream::connect(socket_path).await.is_err() {
            std::fs::remove_file(socket_path)?;
            tracing::info!("removed stale socket at {socket_path}");
        } else {
            anyhow::bail!("another daemon is already running at {socket_path}");
        }
    }

    let listener = UnixListener::bind(socket_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!("UDS server listening on {socket_path}");

    loop {
        let (stream, _) = listener.accept().await?;
        let daemon = Arc::clone(&daemon);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, daemon).await {
                tracing::debug!("connection error: {e}");
            }
        });
    }
}

async fn handle_connection(stream: tokio::net::UnixStream, daemon: Arc<Daemon>) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let request: Value = serde_json::from_str(line.trim())?;
    let method = request["method"].as_str().unwrap_or("");
    let id = request["id"].clone();

    let response = match dispatch(&daemon, method, &request["params"]).await {
        Ok(result) => json!({
            "jsonrpc": "2.0",
            "result": result,
            "id": id,
        }),
        Err(e) => {
            tracing::debug!(method, "rpc error: {}", e.message());
            json!({
                "jsonrpc": "2.0",
                "error": {"code": e.code(), "message": e.message()},
                "id": id,
            })
        }
    };
    let mut resp = serde_json::to_string(&response)?;
    resp.push('\n');
    writer.write_all(resp.as_bytes()).await?;

    Ok(())
}

pub(crate) async fn dispatch(d: &Daemon, method: &str, params: &Value) -> Result<Value, RpcError> {
    match method {
        "list_windows" => Ok(list_windows_json(d).await),
        "list_bindings" => {
            let st = d.state.lock().await;
            let records: Vec<_> = st.bindings.table().records().cloned().collect();
            serde_json::to_value(records).map_err(|e| RpcError::Failed(e.to_string()))
        }
        "bind" => bind(d, params).await,
        "unbind" => {
            let topic = topic_param(params)?;
            let removed = d.state.lock().await.bindings.unbind(topic)?;
            clear_status(d, topic).await;
            Ok(json!({"removed": removed.is_some()}))
        }
        "close_topic" => {
            let topic = topic_param(params)?;
            close_topic(d, topic).await
        }
        "kill_window" => {
            let window_id = str_param(params, "window_id")?.to_string();
            let target = window_id.clone();
            let killed = with_tmux(&d.runner, move |r| kill_window(r, &target)).await?;
            let topic = d
                .state
                .lock()
                .await
                .bindings
                .table()
                .lookup_by_window(&window_id)
                .map(|r| r.topic);
            if let Some(topic) = topic {
                close_topic(d, topic).await?;
            }
            Ok(json!({"killed": killed, "topic": topic.map(|t| t.to_string())}))
        }
        "send_keys" => send_text(d, params).await,
        "create_window" => create_window(d, params).await,
        "awaiting_attach" => {
            let st = d.state.lock().await;
            let windows: Vec<&Window> = st.awaiting_attach.values().collect();
            serde_json::to_value(windows).map_err(|e| RpcError::Failed(e.to_string()))
        }
        "status" => Ok(status_json(d).await),
        _ => Err(RpcError::MethodNotFound),
    }
}

fn str_param<'a>(params: &'a Value, key: &str) -> Result<&'a str, RpcError> {
    params[key]
        .as_str()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| RpcError::InvalidParams(format!("missing parameter: {key}")))
}

fn topic_param(params: &Value) -> Result<TopicKey, RpcError> {
    str_param(params, "topic")?
        .parse()
        .map_err(|e: topicmux_core::types::CoreError| RpcError::InvalidParams(e.to_string()))
}

async fn list_windows_json(d: &Daemon) -> Value {
    let st = d.state.lock().await;
    let windows: Vec<Value> = st
        .resolver
        .windows()
        .iter()
        .map(|w| {
            let binding = st.bindings.table().lookup_by_window(&w.window_id);
            json!({
                "window_id": w.window_id,
                "display_name": w.display_name,
                "cwd": w.cwd,
                "current_command": w.current_command,
                "liveness": w.liveness,
                "session_id": w.current_session_id,
                "topic": binding.map(|r| r.topic.to_string()),
            })
        })
        .collect();
    Value::Array(windows)
}

async fn bind(d: &Daemon, params: &Value) -> Result<Value, RpcError> {
    let topic = topic_param(params)?;
    let mut st = d.state.lock().await;
    let window = match (params["window_id"].as_str(), params["display_name"].as_str()) {
        (Some(id), _) => st.resolver.find_live(id),
        (None, Some(name)) => st.resolver.resolve_stale(name),
        (None, None) => {
            return Err(RpcError::InvalidParams(
                "missing parameter: window_id or display_name".into(),
            ));
        }
    }
    .cloned()
    .ok_or_else(|| RpcError::Failed("no single live window matches".into()))?;

    let displaced = st
        .bindings
        .bind(topic, &window.window_id, &window.display_name, Utc::now())?;
    st.awaiting_attach.remove(&window.window_id);
    drop(st);
    d.hub.reopen_topic(topic).await;

    Ok(json!({
        "topic": topic.to_string(),
        "window_id": window.window_id,
        "display_name": window.display_name,
        "displaced": displaced.iter().map(|r| r.topic.to_string()).collect::<Vec<_>>(),
    }))
}

/// Unbind, forget pending tool calls of the window's session and drop
/// everything queued for the topic, under one state lock.
async fn close_topic(d: &Daemon, topic: TopicKey) -> Result<Value, RpcError> {
    let (closed, dropped) = {
        let mut st = d.state.lock().await;
        let removed = st.bindings.unbind(topic)?;
        if let Some(r) = &removed
            && let Some(session_id) = st.session_for_window(&r.window_id).map(str::to_string)
            && let Some(tail) = st.tails.get_mut(&session_id)
        {
            tail.clear();
        }
        let dropped = d.hub.cancel_topic(topic).await;
        (removed.is_some(), dropped)
    };
    clear_status(d, topic).await;
    tracing::info!(%topic, dropped, "closed topic");
    Ok(json!({"closed": closed, "dropped": dropped}))
}

async fn clear_status(d: &Daemon, topic: TopicKey) {
    let Some(message_id) = d.status.lock().await.remove_topic(topic) else {
        return;
    };
    if let Err(e) = run_blocking(&d.transport, move |t| t.delete(topic, message_id)).await {
        tracing::debug!(%topic, "failed to delete status message: {e}");
    }
}

async fn send_text(d: &Daemon, params: &Value) -> Result<Value, RpcError> {
    let topic = topic_param(params)?;
    let text = params["text"]
        .as_str()
        .ok_or_else(|| RpcError::InvalidParams("missing parameter: text".into()))?
        .to_string();
    let enter = params["enter"].as_bool().unwrap_or(true);

    let window_id = {
        let st = d.state.lock().await;
        let record = st
            .bindings
            .table()
            .lookup_by_topic(topic)
            .ok_or_else(|| RpcError::Failed(format!("topic {topic} is not bound")))?;
        if record.state == BindingState::Unresolved || st.resolver.find_live(&record.window_id).is_none() {
            return Err(RpcError::Failed(format!(
                "window '{}' is gone; bind the topic again",
                record.display_name
            )));
        }
        record.window_id.clone()
    };

    let target = window_id.clone();
    with_tmux(&d.runner, move |r| send_keys(r, &target, &text)).await?;
    if enter {
        tokio::time::sleep(ENTER_DELAY).await;
        let target = window_id.clone();
        with_tmux(&d.runner, move |r| send_enter(r, &target)).await?;
    }
    Ok(json!({"window_id": window_id}))
}

async fn create_window(d: &Daemon, params: &Value) -> Result<Value, RpcError> {
    let cwd = str_param(params, "cwd")?.to_string();
    if !Path::new(&cwd).is_dir() {
        return Err(RpcError::InvalidParams(format!("not a directory: {cwd}")));
    }
    let topic = match params["topic"].as_str() {
        Some(_) => Some(topic_param(params)?),
        None => None,
    };
    let base = params["name"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| {
            Path::new(&cwd)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "claude".to_string());

    let session = d.config.tmux_session.clone();
    let dir = cwd.clone();
    let (window_id, name) = with_tmux(&d.runner, move |r| {
        ensure_session(r, &session)?;
        let existing = list_windows(r, &session)?;
        let name = unique_window_name(existing.iter().map(|w| w.window_name.as_str()), &base);
        let id = new_window(r, &session, &dir, &name)?;
        Ok((id, name))
    })
    .await?;
    tracing::info!(window_id, name, cwd, "created window");

    if let Some(topic) = topic {
        d.state
            .lock()
            .await
            .bindings
            .bind(topic, &window_id, &name, Utc::now())?;
        d.hub.reopen_topic(topic).await;
    }
    Ok(json!({
        "window_id": window_id,
        "name": name,
        "topic": topic.map(|t| t.to_string()),
    }))
}

async fn status_json(d: &Daemon) -> Value {
    let queues = d.hub.queue_lengths().await;
    let st = d.state.lock().await;
    json!({
        "tmux_session": d.config.tmux_session,
        "tmux_epoch": st.epoch.current().map(|e| json!({"pid": e.server_pid, "start_time": e.start_time})),
        "windows": st.resolver.windows().len(),
        "live_windows": st.resolver.list_live_windows().count(),
        "sessions": st.sessions.len(),
        "bindings": st.bindings.table().len(),
        "unresolved_bindings": st.bindings.table().unresolved().count(),
        "awaiting_attach": st.awaiting_attach.len(),
        "tracked_transcripts": st.offsets.len(),
        "pending_invocations": st.tails.values().map(|t| t.reconciler().pending_len()).sum::<usize>(),
        "queued": queues
            .iter()
            .map(|(recipient, len)| json!({"recipient": recipient, "len": len}))
            .collect::<Vec<_>>(),
    })
}
