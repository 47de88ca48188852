//! NAM Agent Entry Point
//!
//! Runs the applet manager daemon in the foreground.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use nam_agent::agent::options::{is_pid_alive, LocalStateStore};
use nam_agent::cli::args::GlobalArgs;
use nam_agent::cli::logging;
use nam_agent::runtime::adapter::RuntimeAdapter;
use nam_agent::{AppletManager, DockerAdapter};

#[derive(Parser)]
#[command(name = "nam-agent")]
#[command(author, version, about = "NAM Agent - Node applet manager daemon")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the agent in the foreground
    Start,
    /// Show agent status
    Status,
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.global.resolve()?;

    match cli.command {
        Commands::Start => {
            logging::init(&config)?;
            info!(
                server = %config.nodeswork_server,
                port = config.port,
                app_path = %config.app_path.display(),
                "Starting NAM agent"
            );
            let manager = AppletManager::from_config(config)
                .context("Failed to initialize applet manager")?;
            manager.start_server().await?;
        }
        Commands::Status => {
            show_status(&config).await?;
        }
        Commands::Version => {
            println!("nam-agent {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

async fn show_status(config: &nam_agent::Config) -> Result<()> {
    println!("Agent Status:");

    let store = LocalStateStore::open(&config.app_path)?;
    match store.load()? {
        Some(options) => {
            let running = options.pid.map(is_pid_alive).unwrap_or(false);
            println!("  Server:        {}", options.nodeswork_server);
            println!("  Port:          {}", options.port);
            println!("  Authenticated: {}", options.token.is_some());
            match (running, options.pid) {
                (true, Some(pid)) => println!("  Daemon:        running (pid {})", pid),
                _ => println!("  Daemon:        stopped"),
            }
        }
        None => println!("  Not initialized at {}", config.app_path.display()),
    }

    match DockerAdapter::from_config(&config.engine) {
        Ok(docker) => match docker.version().await {
            Ok(version) => println!(
                "  Engine:        {} {} (connected)",
                docker.runtime_type(),
                version
            ),
            Err(e) => println!("  Engine:        error - {}", e),
        },
        Err(e) => println!("  Engine:        not available - {}", e),
    }

    Ok(())
}
