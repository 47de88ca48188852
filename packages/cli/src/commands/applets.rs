use anyhow::Result;
use colored::Colorize;

use nam_agent::cli::args::GlobalArgs;

use crate::context;

/// List installed applet images
pub async fn list(global: &GlobalArgs) -> Result<()> {
    let manager = context::manager(global, false)?;
    let images = manager.images().await?;

    if images.is_empty() {
        println!("{}", "No applets installed.".dimmed());
        return Ok(());
    }

    println!("{}", "Applets".bold());
    println!("{}", "─".repeat(70));
    println!(
        "  {:<32} {:<12} {:<8} {:<10}",
        "PACKAGE".dimmed(),
        "VERSION".dimmed(),
        "TYPE".dimmed(),
        "RUNTIME".dimmed(),
    );
    println!("{}", "─".repeat(70));

    for image in &images {
        println!(
            "  {:<32} {:<12} {:<8} {:<10}",
            image.package_name, image.version, image.na_type, image.na_version,
        );
    }

    println!();
    println!("{} applet(s)", images.len());

    Ok(())
}
