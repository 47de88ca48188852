use anyhow::Result;
use colored::Colorize;

use nam_agent::cli::args::GlobalArgs;
use nam_agent::{AppletRoute, AppletRunOptions};

use crate::context;
use crate::RuntimeArgs;

/// Start a container for each target
pub async fn run(
    global: &GlobalArgs,
    targets: &[String],
    applet_id: &str,
    applet_token: &str,
    runtime: &RuntimeArgs,
) -> Result<()> {
    let images = context::images(targets, runtime)?;
    let manager = context::manager(global, false)?;

    for image in images {
        let label = format!("{}@{}", image.package_name, image.version);
        let options = AppletRunOptions {
            route: AppletRoute::new(applet_id, image),
            applet_token: applet_token.to_string(),
        };
        println!("{} Starting {}...", "→".blue().bold(), label);
        manager.run(&options).await?;
        println!(
            "{} Applet {} running as {}",
            "✓".green().bold(),
            label,
            options.route.container_name().dimmed()
        );
    }

    Ok(())
}
