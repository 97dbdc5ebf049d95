//! Demo CLI for the roost sync engine.

mod commands;
mod config;
mod output;
mod persist;
mod sim;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{feed, message};

/// Sync engine demo shell
#[derive(Parser)]
#[command(name = "roost")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "plain")]
    format: output::OutputFormat,

    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed operations
    #[command(alias = "f")]
    Feed {
        #[command(subcommand)]
        action: feed::FeedAction,
    },

    /// Message operations
    #[command(alias = "m")]
    Message {
        #[command(subcommand)]
        action: message::MessageAction,
    },

    /// Show or change the configuration
    Config {
        /// Set the local user
        #[arg(long)]
        owner: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match cli.command {
        Commands::Feed { action } => feed::handle(action, cli.format, cli.verbose).await,
        Commands::Message { action } => message::handle(action, cli.format, cli.verbose).await,
        Commands::Config { owner } => {
            let mut cfg = config::load_config()?;
            if let Some(owner) = owner {
                cfg.owner = owner;
                config::save_config(&cfg)?;
            }
            println!("Config file:  {}", config::config_path()?.display());
            println!("Cache file:   {}", config::cache_path()?.display());
            println!("Owner:        {}", cfg.owner);
            println!("Page size:    {}", cfg.page_size);
            println!("Poll every:   {}s", cfg.poll_secs);
            println!(
                "Sim:          offline={} fail_mutations={} fail_first_fetch={}",
                cfg.sim.offline, cfg.sim.fail_mutations, cfg.sim.fail_first_fetch
            );
            Ok(())
        }
    }
}
