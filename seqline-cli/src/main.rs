//! Main entry point for the seqline CLI.

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::path::PathBuf;

mod commands;

/// seqline CLI
#[derive(Parser)]
#[command(name = "seqline")]
#[command(about = "Replay conversation event streams through the seqline ordering engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Subcommands for the seqline CLI
#[derive(Subcommand)]
enum Commands {
    /// Route a recorded event stream and print every dispatched event
    Replay {
        /// JSON-lines file of raw events in arrival order, or `-` for stdin
        #[arg(
            long,
            short,
            help = "JSON-lines file of raw events in arrival order, or `-` to read stdin"
        )]
        events: PathBuf,

        /// JSON-lines archive used to recover missing events
        #[arg(long, help = "JSON-lines archive used to recover missing events")]
        history: Option<PathBuf>,

        /// Base URL of the conversation events API used to recover missing events
        #[arg(
            long,
            conflicts_with = "history",
            help = "Base URL of the conversation events API (overrides history.base_url)"
        )]
        history_url: Option<String>,

        /// Path to the configuration file (optional)
        #[arg(
            long,
            short,
            help = "Path to the configuration file (yaml, json or toml). If not provided, defaults will be used."
        )]
        config: Option<PathBuf>,

        /// Print the final state of every conversation to stderr
        #[arg(long, help = "Print the final state of every conversation to stderr")]
        summary: bool,

        /// Print Prometheus metrics to stderr once the replay is done
        #[arg(long, help = "Print Prometheus metrics to stderr once the replay is done")]
        metrics: bool,
    },

    /// Generate shell completion scripts for the CLI
    Completion {
        /// The shell type for which to generate the completion script (e.g., bash, zsh, fish, powershell)
        #[arg(
            long,
            short,
            help = "The shell type for which to generate the completion script (e.g., bash, zsh, fish, powershell)"
        )]
        shell: clap_complete::Shell,
    },

    /// Generate a configuration file
    Config {
        /// Format of the configuration file to generate (yaml, json or toml). Defaults to yaml.
        #[arg(
            long,
            short,
            help = "Format of the configuration file to generate (yaml, json or toml). Defaults to yaml."
        )]
        format: Option<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Replay {
            events,
            history,
            history_url,
            config,
            summary,
            metrics,
        } => {
            commands::replay::run_replay(commands::replay::ReplayOptions {
                events,
                history,
                history_url,
                config,
                summary,
                metrics,
            })
            .await?;
        }
        Commands::Completion { shell } => {
            commands::completion::generate_completion(shell);
        }
        Commands::Config { format } => {
            let format = format.unwrap_or_else(|| "yaml".to_string());
            commands::config::generate_config(&format)?;
        }
    }

    Ok(())
}
