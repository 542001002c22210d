use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tandem_observability::{init_process_logging, ProcessKind};
use tandem_providers::{AppConfig, ProviderRegistry};
use tandem_server::{serve, AppState, SearchConfig};

#[derive(Parser, Debug)]
#[command(name = "tandem-research-engine")]
#[command(about = "Headless agentic web-research engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the research endpoint over HTTP/SSE.
    Serve {
        #[arg(long, alias = "host", default_value = "127.0.0.1")]
        hostname: String,
        #[arg(long, default_value_t = 3000)]
        port: u16,
        #[arg(long)]
        state_dir: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Command::Serve {
        hostname,
        port,
        state_dir,
    } = Cli::parse().command;

    let state_dir = resolve_state_dir(state_dir);
    let logs_dir = state_dir.join("logs");
    let (_guard, log_info) = init_process_logging(ProcessKind::Engine, &logs_dir, 14)
        .context("failed to initialize logging")?;
    tracing::info!(logs_dir = %log_info.logs_dir, "logging initialized");

    let providers = ProviderRegistry::new(AppConfig::default());
    let search = SearchConfig::from_env();
    let state = AppState::new(providers, search);

    let addr: SocketAddr = format!("{hostname}:{port}")
        .parse()
        .context("invalid hostname or port")?;
    tracing::info!(%addr, "starting tandem-research-engine");
    serve(addr, state).await?;

    Ok(())
}

fn resolve_state_dir(flag: Option<String>) -> PathBuf {
    if let Some(dir) = flag {
        return PathBuf::from(dir);
    }
    if let Ok(dir) = std::env::var("TANDEM_STATE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    PathBuf::from(".tandem-research")
}
