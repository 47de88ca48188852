use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;

use nam_agent::cli::args::GlobalArgs;

mod commands;
mod context;

#[derive(Parser)]
#[command(name = "nam", about = "NAM - Nodeswork applet manager")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and register this device with Nodeswork
    Auth,

    /// List installed applet images
    Applets,

    /// Control the background daemon
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },

    /// Build applet images from published packages
    Install {
        /// Targets as <package>@<version>
        #[arg(required = true)]
        targets: Vec<String>,

        #[command(flatten)]
        runtime: RuntimeArgs,
    },

    /// Start applet containers
    Run {
        /// Targets as <package>@<version>
        #[arg(required = true)]
        targets: Vec<String>,

        #[arg(long, default_value = "applet-id-placeholder")]
        applet_id: String,

        #[arg(long, default_value = "applet-token-placeholder")]
        applet_token: String,

        #[command(flatten)]
        runtime: RuntimeArgs,
    },

    /// Stop applet containers
    Kill {
        /// Targets as <package>@<version>
        #[arg(required = true)]
        targets: Vec<String>,

        #[arg(long)]
        applet_id: String,

        #[command(flatten)]
        runtime: RuntimeArgs,
    },

    /// List running applets
    Ps {
        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum DaemonAction {
    /// Start the daemon
    Start {
        /// Stay attached and log to the console
        #[arg(long)]
        foreground: bool,
    },
    /// Stop the daemon
    Stop,
    /// Stop, then start the daemon
    Restart {
        #[arg(long)]
        foreground: bool,
    },
}

#[derive(clap::Args, Clone)]
pub struct RuntimeArgs {
    /// Applet runtime type
    #[arg(long, default_value = "npm")]
    pub na_type: String,

    /// Applet runtime version
    #[arg(long, default_value = "8.3.0")]
    pub na_version: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let debug = cli.global.debug;

    if let Err(e) = execute(cli).await {
        if debug {
            eprintln!("{} {:?}", "error:".red().bold(), e);
        } else {
            eprintln!("{} {}", "error:".red().bold(), e);
        }
        std::process::exit(1);
    }
}

async fn execute(cli: Cli) -> Result<()> {
    let global = cli.global;

    match cli.command {
        Commands::Auth => commands::auth::run(&global).await,
        Commands::Applets => commands::applets::list(&global).await,
        Commands::Daemon { action } => commands::daemon::run(&global, action).await,
        Commands::Install { targets, runtime } => {
            commands::install::run(&global, &targets, &runtime).await
        }
        Commands::Run {
            targets,
            applet_id,
            applet_token,
            runtime,
        } => commands::run::run(&global, &targets, &applet_id, &applet_token, &runtime).await,
        Commands::Kill {
            targets,
            applet_id,
            runtime,
        } => commands::kill::run(&global, &targets, &applet_id, &runtime).await,
        Commands::Ps { json } => commands::ps::run(&global, json).await,
    }
}
