use anyhow::Result;
use colored::Colorize;

use nam_agent::cli::args::GlobalArgs;

use crate::context;

/// List applets running on this device
pub async fn run(global: &GlobalArgs, json: bool) -> Result<()> {
    let manager = context::manager(global, false)?;
    let applets = manager.ps().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&applets)?);
        return Ok(());
    }

    if applets.is_empty() {
        println!("{}", "No applets running.".dimmed());
        return Ok(());
    }

    println!("{}", "Applets".bold());
    println!("{}", "─".repeat(90));
    println!(
        "  {:<26} {:<24} {:<10} {:<16} {:>6} {:<10}",
        "APPLET ID".dimmed(),
        "PACKAGE".dimmed(),
        "VERSION".dimmed(),
        "IP".dimmed(),
        "PORT".dimmed(),
        "STATUS".dimmed(),
    );
    println!("{}", "─".repeat(90));

    for applet in &applets {
        let status = if applet.running {
            applet.status.green()
        } else {
            applet.status.yellow()
        };
        println!(
            "  {:<26} {:<24} {:<10} {:<16} {:>6} {:<10}",
            applet.applet_id,
            applet.image.package_name,
            applet.image.version,
            applet.ip,
            applet.port,
            status,
        );
    }

    println!();
    println!("{} applet(s)", applets.len());

    Ok(())
}
