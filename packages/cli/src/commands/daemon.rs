use anyhow::{bail, Context, Result};
use colored::Colorize;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use nam_agent::agent::options::{is_pid_alive, LocalStateStore};
use nam_agent::cli::args::GlobalArgs;

use crate::context;
use crate::DaemonAction;

const START_WAIT: Duration = Duration::from_secs(10);

/// Handle the daemon command
pub async fn run(global: &GlobalArgs, action: DaemonAction) -> Result<()> {
    match action {
        DaemonAction::Stop => stop(global).await,
        DaemonAction::Start { foreground } => start(global, foreground).await,
        DaemonAction::Restart { foreground } => {
            stop(global).await?;
            start(global, foreground).await
        }
    }
}

async fn stop(global: &GlobalArgs) -> Result<()> {
    let manager = context::manager(global, false)?;
    if !manager.is_started() {
        println!("{}", "Daemon is not running.".dimmed());
        return manager.stop_server().await.map_err(Into::into);
    }
    manager.stop_server().await?;
    println!("{} Daemon stopped", "✓".green().bold());
    Ok(())
}

async fn start(global: &GlobalArgs, foreground: bool) -> Result<()> {
    if foreground {
        let manager = context::manager(global, true)?;
        if manager.is_started() {
            println!("daemon is already started.");
            return Ok(());
        }
        return manager.start_server().await.map_err(Into::into);
    }

    let config = context::config(global)?;
    if running_pid(&config.app_path)?.is_some() {
        println!("daemon is already started.");
        return Ok(());
    }

    let log_dir = log_dir(&config.app_path);
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create {}", log_dir.display()))?;
    let stdout = File::create(log_dir.join("stdout"))?;
    let stderr = File::create(log_dir.join("stderr"))?;

    let exe = std::env::current_exe().context("Failed to locate the nam executable")?;
    let mut child = Command::new(exe)
        .args(global.to_args())
        .args(["daemon", "start", "--foreground"])
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .spawn()
        .context("Failed to spawn the daemon")?;

    let spinner = super::spinner("Starting daemon".to_string())?;
    let deadline = tokio::time::Instant::now() + START_WAIT;
    loop {
        if let Some(pid) = running_pid(&config.app_path)? {
            spinner.finish_and_clear();
            println!(
                "{} Daemon started (pid {}) on port {}",
                "✓".green().bold(),
                pid,
                config.port
            );
            println!(
                "  Logs in {}",
                log_dir.display().to_string().dimmed()
            );
            return Ok(());
        }
        if let Some(status) = child.try_wait()? {
            spinner.finish_and_clear();
            bail!(
                "Daemon exited with {}; see {}",
                status,
                log_dir.join("stderr").display()
            );
        }
        if tokio::time::Instant::now() >= deadline {
            spinner.finish_and_clear();
            bail!(
                "Daemon did not report ready within {}s; see {}",
                START_WAIT.as_secs(),
                log_dir.display()
            );
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

fn log_dir(app_path: &Path) -> PathBuf {
    app_path.join("logs").join("daemon")
}

/// Pid of a live daemon recorded in the local state store.
fn running_pid(app_path: &Path) -> Result<Option<u32>> {
    let store = LocalStateStore::open(app_path)?;
    Ok(store
        .load()?
        .and_then(|options| options.pid)
        .filter(|pid| is_pid_alive(*pid)))
}
