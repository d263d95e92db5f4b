//! UDS JSON-RPC client for CLI subcommands.

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::cli::{BindOpts, Command, CreateWindowOpts, SendOpts};

pub(crate) async fn rpc_call(socket_path: &str, method: &str, params: Value) -> anyhow::Result<Value> {
    let stream = UnixStream::connect(socket_path)
        .await
        .map_err(|e| anyhow::anyhow!("cannot connect to daemon at {socket_path}: {e}"))?;

    let (reader, mut writer) = stream.into_split();

    let request = json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": 1,
    });
    let mut req = serde_json::to_string(&request)?;
    req.push('\n');
    writer.write_all(req.as_bytes()).await?;
    writer.shutdown().await?;

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response: Value = serde_json::from_str(line.trim())?;

    if let Some(error) = response.get("error") {
        let message = error["message"].as_str().unwrap_or("unknown error");
        anyhow::bail!("RPC error: {message}");
    }

    Ok(response["result"].clone())
}

/// Method and params for a control subcommand. `None` for subcommands that
/// do not talk to the daemon.
pub(crate) fn request_for(command: &Command) -> Option<(&'static str, Value)> {
    let req = match command {
        Command::ListWindows => ("list_windows", json!({})),
        Command::ListBindings => ("list_bindings", json!({})),
        Command::Bind(BindOpts { topic, window, name }) => (
            "bind",
            json!({"topic": topic, "window_id": window, "display_name": name}),
        ),
        Command::Unbind(opts) => ("unbind", json!({"topic": opts.topic})),
        Command::CloseTopic(opts) => ("close_topic", json!({"topic": opts.topic})),
        Command::KillWindow(opts) => ("kill_window", json!({"window_id": opts.window_id})),
        Command::Send(SendOpts { topic, text, no_enter }) => (
            "send_keys",
            json!({"topic": topic, "text": text, "enter": !no_enter}),
        ),
        Command::CreateWindow(CreateWindowOpts { cwd, name, topic }) => (
            "create_window",
            json!({"cwd": absolute(cwd), "name": name, "topic": topic}),
        ),
        Command::Status => ("status", json!({})),
        Command::Daemon(_) | Command::Hook | Command::SetupHook(_) => return None,
    };
    Some(req)
}

fn absolute(path: &str) -> String {
    std::path::absolute(path)
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| path.to_string())
}

/// Run a control subcommand against the daemon and print the result.
pub async fn run_command(socket_path: &str, command: &Command) -> anyhow::Result<()> {
    let Some((method, params)) = request_for(command) else {
        return Ok(());
    };
    let result = rpc_call(socket_path, method, params).await?;
    let output = match command {
        Command::ListWindows => format_windows(&result),
        Command::ListBindings => format_bindings(&result),
        Command::Status => format_status(&result),
        _ => serde_json::to_string_pretty(&result)?,
    };
    println!("{output}");
    Ok(())
}

/// `WINDOW  NAME  STATE  TOPIC  SESSION` table.
pub(crate) fn format_windows(windows: &Value) -> String {
    let Some(arr) = windows.as_array() else {
        return String::new();
    };
    if arr.is_empty() {
        return "no windows".to_string();
    }
    let rows: Vec<[String; 5]> = arr
        .iter()
        .map(|w| {
            [
                text(&w["window_id"]),
                text(&w["display_name"]),
                text(&w["liveness"]),
                text(&w["topic"]),
                text(&w["session_id"]),
            ]
        })
        .collect();
    table(["WINDOW", "NAME", "STATE", "TOPIC", "SESSION"], &rows)
}

pub(crate) fn format_bindings(bindings: &Value) -> String {
    let Some(arr) = bindings.as_array() else {
        return String::new();
    };
    if arr.is_empty() {
        return "no bindings".to_string();
    }
    let rows: Vec<[String; 5]> = arr
        .iter()
        .map(|b| {
            let topic = &b["topic"];
            [
                format!("{}:{}", topic["recipient"], topic["topic"]),
                text(&b["window_id"]),
                text(&b["display_name"]),
                text(&b["state"]),
                text(&b["last_read_offset"]),
            ]
        })
        .collect();
    table(["TOPIC", "WINDOW", "NAME", "STATE", "LAST READ"], &rows)
}

pub(crate) fn format_status(status: &Value) -> String {
    let mut lines = vec![
        format!("tmux session:        {}", text(&status["tmux_session"])),
        format!(
            "windows:             {} ({} live)",
            text(&status["windows"]),
            text(&status["live_windows"])
        ),
        format!("sessions:            {}", text(&status["sessions"])),
        format!(
            "bindings:            {} ({} unresolved)",
            text(&status["bindings"]),
            text(&status["unresolved_bindings"])
        ),
        format!("awaiting attach:     {}", text(&status["awaiting_attach"])),
        format!("pending tool calls:  {}", text(&status["pending_invocations"])),
    ];
    if let Some(queues) = status["queued"].as_array() {
        for q in queues.iter().filter(|q| q["len"].as_u64().unwrap_or(0) > 0) {
            lines.push(format!(
                "queued for {}:       {}",
                text(&q["recipient"]),
                text(&q["len"])
            ));
        }
    }
    lines.join("\n")
}

fn text(v: &Value) -> String {
    match v {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn table<const N: usize>(header: [&str; N], rows: &[[String; N]]) -> String {
    let mut widths = header.map(|h| h.chars().count());
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }
    let line = |cells: Vec<&str>| {
        cells
            .iter()
            .zip(widths)
            .map(|(c, w)| format!("{c:<w$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };
    let mut out = vec![line(header.to_vec())];
    out.extend(rows.iter().map(|r| line(r.iter().map(String::as_str).collect())));
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, TopicOpts};
    use clap::Parser;

    #[test]
    fn send_maps_no_enter() {
        let cli = Cli::try_parse_from(["topicmux", "send", "1:2", "hi", "--no-enter"]).expect("test");
        let (method, params) = request_for(&cli.command).expect("test");
        assert_eq!(method, "send_keys");
        assert_eq!(params["enter"], false);
        assert_eq!(params["text"], "hi");
    }

    #[test]
    fn local_commands_have_no_request() {
        assert!(request_for(&Command::Hook).is_none());
        let close = Command::CloseTopic(TopicOpts { topic: "1:2".into() });
        assert_eq!(request_for(&close).expect("test").0, "close_topic");
    }

    #[test]
    fn windows_table() {
        let out = format_windows(&json!([
            {"window_id": "@1", "display_name": "api", "liveness": "live", "topic": "7:70", "session_id": "s1"},
            {"window_id": "@12", "display_name": "web", "liveness": "dead", "topic": null, "session_id": null},
        ]));
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("WINDOW  NAME"));
        assert!(lines[1].starts_with("@1      api"));
        assert!(lines[2].contains("dead   -"));
    }

    #[test]
    fn empty_lists() {
        assert_eq!(format_windows(&json!([])), "no windows");
        assert_eq!(format_bindings(&json!([])), "no bindings");
    }

    #[test]
    fn bindings_table_shows_topic_key() {
        let out = format_bindings(&json!([{
            "topic": {"recipient": 7, "topic": 70},
            "window_id": "@1",
            "display_name": "api",
            "state": "resolved",
            "last_read_offset": 120,
        }]));
        assert!(out.lines().nth(1).expect("test").starts_with("7:70"));
        assert!(out.contains("120"));
    }

    #[test]
    fn status_lists_nonempty_queues() {
        let out = format_status(&json!({
            "tmux_session": "topicmux",
            "windows": 2, "live_windows": 1, "sessions": 1,
            "bindings": 1, "unresolved_bindings": 0,
            "awaiting_attach": 0, "pending_invocations": 3,
            "queued": [{"recipient": 7, "len": 2}, {"recipient": 8, "len": 0}],
        }));
        assert!(out.contains("2 (1 live)"));
        assert!(out.contains("queued for 7"));
        assert!(!out.contains("queued for 8"));
    }
}
