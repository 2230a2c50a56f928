use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use packrat::cli::{channels, info, messages, sessions, users};
use packrat::config::Config;
use packrat::store::Source;

#[derive(Parser)]
#[command(name = "packrat")]
#[command(about = "Inspect a crawl chunk database")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "packrat.yaml")]
    config: String,

    /// Database path (overrides the config file)
    #[arg(short, long)]
    database: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List crawl sessions
    Sessions,

    /// List captured channels
    Channels,

    /// List captured users
    Users,

    /// Show a channel timeline or a single thread
    Messages {
        /// Channel ID
        channel: String,

        /// Thread timestamp (show that thread instead of the timeline)
        #[arg(short, long)]
        thread: Option<String>,
    },

    /// Show workspace and session info
    Info,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = Config::load(&cli.config).unwrap_or_default();
    let src = match &cli.database {
        Some(path) => Source::open(path)?,
        None => Source::open(config.database_path())?,
    };

    match cli.command {
        Commands::Sessions => sessions::run(&src)?,
        Commands::Channels => channels::run(&src)?,
        Commands::Users => users::run(&src)?,
        Commands::Messages { channel, thread } => {
            messages::run(&src, &channel, thread.as_deref())?;
        }
        Commands::Info => info::run(&src)?,
    }

    Ok(())
}
