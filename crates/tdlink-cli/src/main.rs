mod commands;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::CliConfig;

#[derive(Parser)]
#[command(name = "tdlink", about = "Call and watch a JSON messaging engine over its bridge socket")]
struct Cli {
    /// Bridge socket path
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// Config file (default: ~/.config/tdlink/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// How long `call` waits for its reply, in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Log dispatch activity to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a request and print the reply that carries its token
    Call {
        /// Request object, e.g. '{"@type":"getMe"}'
        request: String,
    },

    /// Print updates as JSON lines
    Listen {
        /// Only updates of this kind
        #[arg(long)]
        kind: Option<String>,

        /// Exit after this many updates
        #[arg(long)]
        count: Option<usize>,
    },

    /// Print new messages of one chat as JSON lines
    Messages {
        /// Chat to follow
        #[arg(long)]
        chat_id: i64,

        /// Exit after this many messages
        #[arg(long)]
        count: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let directive = if cli.verbose {
        "tdlink=debug"
    } else {
        "tdlink=warn"
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();

    let mut config = match &cli.config {
        Some(path) => CliConfig::load_from(path)?,
        None => CliConfig::load()?,
    };
    if let Some(socket) = cli.socket {
        config.socket_path = Some(socket);
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.client.call_timeout_ms = timeout_ms;
    }

    match cli.command {
        Commands::Call { request } => commands::call(&config, &request).await,
        Commands::Listen { kind, count } => commands::listen(&config, kind, count).await,
        Commands::Messages { chat_id, count } => {
            commands::messages(&config, chat_id, count).await
        }
    }
}
