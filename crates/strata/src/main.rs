//! Strata - content-addressed versioned filesystem repositories.

use clap::{Parser, Subcommand};
use miette::Result;
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "strata")]
#[command(version, about = "Content-addressed versioned filesystem repositories", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct GlobalOptions {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to the repository
    #[arg(long, global = true, default_value = ".")]
    repo: PathBuf,

    /// Number of parallel downloads
    #[arg(short, long, global = true)]
    jobs: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a repository
    Init {
        /// Storage mode
        #[arg(long, default_value = "bare")]
        mode: String,
    },

    /// Pull refs from a remote
    Pull {
        /// Remote name or base URL
        remote: String,
        /// Refs or commit digests to fetch
        refs: Vec<String>,
        /// Ancestor depth: -1 for all, 0 for none
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        depth: i32,
        /// Restrict file fetches to this subtree
        #[arg(long)]
        subdir: Option<String>,
        /// Mirror the remote: global ref namespace plus summary
        #[arg(long)]
        mirror: bool,
        /// Fetch only the commit objects themselves
        #[arg(long)]
        commit_only: bool,
        /// Never use static deltas
        #[arg(long)]
        disable_static_deltas: bool,
        /// Local remote name when pulling from a bare URL
        #[arg(long)]
        remote_name: Option<String>,
    },

    /// List refs
    Refs,

    /// Manage remotes
    Remote {
        #[command(subcommand)]
        action: RemoteAction,
    },
}

#[derive(Subcommand)]
enum RemoteAction {
    /// Add a remote
    Add {
        /// Remote name
        name: String,
        /// Base URL
        url: String,
        /// Require signed commits
        #[arg(long)]
        verify: bool,
        /// Require a signed summary
        #[arg(long)]
        verify_summary: bool,
        /// Branches pulled by default
        #[arg(long)]
        branch: Vec<String>,
        /// File of trusted public keys (hex, one per line)
        #[arg(long)]
        keyring: Option<PathBuf>,
    },
    /// List remotes
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.global.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    if !cli.global.quiet {
        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_target(false)
            .init();
    }

    match cli.command {
        Commands::Init { mode } => {
            commands::init(&cli.global.repo, &mode)?;
        }
        Commands::Pull {
            remote,
            refs,
            depth,
            subdir,
            mirror,
            commit_only,
            disable_static_deltas,
            remote_name,
        } => {
            commands::pull(
                &cli.global.repo,
                &remote,
                commands::PullArgs {
                    refs,
                    depth,
                    subdir,
                    mirror,
                    commit_only,
                    disable_static_deltas,
                    remote_name,
                    jobs: cli.global.jobs,
                    quiet: cli.global.quiet,
                },
            )
            .await?;
        }
        Commands::Refs => {
            commands::refs(&cli.global.repo)?;
        }
        Commands::Remote { action } => match action {
            RemoteAction::Add {
                name,
                url,
                verify,
                verify_summary,
                branch,
                keyring,
            } => {
                commands::remote_add(
                    &cli.global.repo,
                    &name,
                    &url,
                    verify,
                    verify_summary,
                    branch,
                    keyring.as_deref(),
                )?;
            }
            RemoteAction::List => {
                commands::remote_list(&cli.global.repo)?;
            }
        },
    }

    Ok(())
}
