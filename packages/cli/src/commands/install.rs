use anyhow::Result;
use colored::Colorize;

use nam_agent::cli::args::GlobalArgs;

use crate::context;
use crate::RuntimeArgs;

/// Build the image of each target
pub async fn run(global: &GlobalArgs, targets: &[String], runtime: &RuntimeArgs) -> Result<()> {
    let images = context::images(targets, runtime)?;
    let manager = context::manager(global, false)?;

    for image in &images {
        let spinner = super::spinner(format!(
            "Installing {}@{}",
            image.package_name, image.version
        ))?;
        let outcome = manager.install(image).await;
        spinner.finish_and_clear();
        outcome?;
        println!(
            "{} Installed applet {}@{}",
            "✓".green().bold(),
            image.package_name,
            image.version
        );
    }

    Ok(())
}
