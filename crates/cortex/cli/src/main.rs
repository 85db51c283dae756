//! Cortex CLI
//!
//! `cortex hook <event>` reads one JSON payload (stdin or `--payload-file`)
//! and writes one JSON response to stdout. Handled failures are reported in
//! the response body with exit code 0. Logs go to stderr.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod output;

use commands::{graveyard, hook, invariants, store};
use cortex_types::CortexConfig;

#[derive(Parser)]
#[command(name = "cortex")]
#[command(about = "Cortex - session enforcement hooks for coding agents", long_about = None)]
#[command(version)]
struct Cli {
    /// Project root
    #[arg(short, long, env = "CORTEX_ROOT", default_value = ".")]
    root: PathBuf,

    /// Configuration file (defaults to <root>/cortex.toml)
    #[arg(short, long, env = "CORTEX_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Handle one hook event
    Hook(hook::HookArgs),

    /// Create or verify the session store
    InitDb,

    /// Inspect the graveyard of failed approaches
    Graveyard {
        #[command(subcommand)]
        command: graveyard::GraveyardCommands,
    },

    /// Manage invariant suites
    Invariants {
        #[command(subcommand)]
        command: invariants::InvariantCommands,
    },

    /// Print the effective configuration
    ShowConfig,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_env("CORTEX_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let text_layer = (!json).then(|| {
        tracing_subscriber::fmt::layer()
            .without_time()
            .with_writer(std::io::stderr)
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = match &cli.config {
        Some(path) => CortexConfig::load(path),
        None => CortexConfig::load_from_root(&cli.root),
    };

    match cli.command {
        Commands::Hook(args) => hook::execute(args, &cli.root, config).await,
        Commands::InitDb => store::init_db(&cli.root, &config),
        Commands::Graveyard { command } => graveyard::execute(command, &cli.root, config),
        Commands::Invariants { command } => invariants::execute(command, &cli.root, config),
        Commands::ShowConfig => commands::show_config(&config),
    }
}
