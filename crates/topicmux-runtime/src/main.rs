//! topicmux: bridges chat topics to Claude sessions running in tmux windows.
//! One binary: the daemon, the SessionStart hook and the control CLI.

use clap::Parser;

mod cli;
mod client;
mod config;
mod daemon;
mod delivery;
mod hook;
mod monitor;
mod server;
mod setup_hooks;
mod status_loop;
mod transport;

fn init_logging(default: &str) {
    let filter = std::env::var("TOPICMUX_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| default.to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    match &args.command {
        cli::Command::Daemon(opts) => {
            init_logging("info");
            let config = config::Config::from_cli(&args, opts)?;
            tracing::info!(
                tmux_session = %config.tmux_session,
                state_dir = %config.state_dir.display(),
                "topicmux daemon starting"
            );
            daemon::run_daemon(config).await?;
        }
        cli::Command::Hook => {
            init_logging("warn");
            // The hook must never fail the Claude session it runs in.
            if let Err(e) = run_hook(&args) {
                tracing::error!("hook failed: {e:#}");
            }
        }
        cli::Command::SetupHook(opts) => {
            let (path, changed) = setup_hooks::apply_hook(opts)?;
            if changed {
                println!("hook installed in {}", path.display());
            } else {
                println!("hook already installed in {}", path.display());
            }
        }
        command => {
            let socket_path = args.socket_path.clone().unwrap_or_else(cli::default_socket_path);
            client::run_command(&socket_path, command).await?;
        }
    }

    Ok(())
}

fn run_hook(args: &cli::Cli) -> anyhow::Result<()> {
    let state_dir = config::resolve_state_dir(args.state_dir.as_deref())?;
    let runner = daemon::tmux_executor(args.tmux_socket.as_deref());
    let pane = std::env::var("TMUX_PANE").ok();
    match hook::run_hook(&state_dir, &runner, pane.as_deref(), std::io::stdin().lock())? {
        Ok(window) => tracing::debug!(window_id = %window.window_id, "session recorded"),
        Err(skip) => tracing::debug!("hook skipped: {skip}"),
    }
    Ok(())
}
