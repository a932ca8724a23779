mod config;
mod db;
mod error;
mod ipc;
mod model;
mod store;
mod workflow;

use anyhow::{bail, Context, Result};
use clap::Parser;
use config::{BackendKind, Config, Overrides};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Facility-damage and duty attendance reporting daemon.
///
/// Reads one JSON request per line on stdin and writes one JSON response
/// (or event) per line on stdout. Logs go to stderr.
#[derive(Parser, Debug)]
#[command(name = "laporand", version, about)]
struct Args {
    /// TOML configuration file.
    #[arg(long, env = "LAPORAND_CONFIG")]
    config: Option<PathBuf>,

    /// Persistence backend: local or remote.
    #[arg(long, env = "LAPORAND_BACKEND", value_parser = parse_backend)]
    backend: Option<BackendKind>,

    /// Workspace directory for the local backend.
    #[arg(long, env = "LAPORAND_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Enables admin sign-in with this password.
    #[arg(long, env = "LAPORAND_ADMIN_PASSWORD", hide_env_values = true)]
    admin_password: Option<String>,

    /// Log filter, e.g. `info` or `laporand=debug`.
    #[arg(long, env = "LAPORAND_LOG", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

fn parse_backend(s: &str) -> Result<BackendKind, String> {
    BackendKind::parse(s).ok_or_else(|| format!("unknown backend {s:?}; expected local or remote"))
}

fn init_tracing(args: &Args) {
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false);
    if args.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::default(),
    };
    config.apply(Overrides {
        backend: args.backend,
        workspace: args.workspace.clone(),
        admin_password: args.admin_password.clone(),
    });
    if let Err(errors) = config.validate() {
        for e in &errors {
            warn!(field = %e.field, "{}", e.message);
        }
        let listed: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        bail!("invalid configuration: {}", listed.join("; "));
    }
    Ok(config)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args);
    let config = load_config(&args).context("failed to load configuration")?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = config.backend.as_str(),
        "laporand starting"
    );

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<serde_json::Value>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(msg) = out_rx.recv().await {
            let mut line = serde_json::to_string(&msg).unwrap_or_else(|_| "{\"ok\":false}".to_string());
            line.push('\n');
            if stdout.write_all(line.as_bytes()).await.is_err() || stdout.flush().await.is_err() {
                break;
            }
        }
    });

    let mut state = ipc::AppState::new(config, out_tx.clone());
    state.open_configured_store();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "unparseable request line");
                let _ = out_tx.send(ipc::bad_json(e.to_string()));
                continue;
            }
        };
        let resp = ipc::handle_request(&mut state, req).await;
        if out_tx.send(resp).is_err() {
            break;
        }
    }

    info!("stdin closed; shutting down");
    state.cancel_subscriptions();
    drop(state);
    drop(out_tx);
    let _ = writer.await;
    Ok(())
}
