//! skyd — the Skyward autoscaler daemon.
//!
//! Single binary that assembles the decision core:
//! - State store (redb)
//! - Policy validation gate
//! - Scaling engine (one worker per app)
//!
//! The store is single-process; run the admin commands while the daemon
//! is stopped. Deployed policies are restored when `run` starts.
//!
//! # Usage
//!
//! ```text
//! skyd apply --app web-frontend policy.json
//! skyd run --data-dir /var/lib/skyward
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod admin;
mod run;

#[derive(Parser)]
#[command(name = "skyd", about = "Skyward autoscaler daemon")]
struct Cli {
    /// Data directory for persistent state.
    #[arg(long, global = true, default_value = "/var/lib/skyward")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon: restore a worker for every stored policy and
    /// scale on schedule boundaries until interrupted.
    Run,
    /// Validate a policy document and store it for an app.
    Apply {
        /// Application identifier.
        #[arg(long)]
        app: String,
        /// Path to the policy JSON document.
        policy: PathBuf,
    },
    /// Remove an app's policy and its active-schedule record.
    Remove {
        #[arg(long)]
        app: String,
    },
    /// Print an app's stored policy and active schedule.
    Show {
        #[arg(long)]
        app: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,skyd=debug,skyward_engine=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run => run::run(&cli.data_dir).await,
        Command::Apply { app, policy } => admin::apply(&cli.data_dir, &app, &policy),
        Command::Remove { app } => admin::remove(&cli.data_dir, &app),
        Command::Show { app } => admin::show(&cli.data_dir, &app),
    }
}
