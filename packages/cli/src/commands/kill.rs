use anyhow::Result;
use colored::Colorize;

use nam_agent::cli::args::GlobalArgs;
use nam_agent::AppletRoute;

use crate::context;
use crate::RuntimeArgs;

/// Stop the container of each target
pub async fn run(
    global: &GlobalArgs,
    targets: &[String],
    applet_id: &str,
    runtime: &RuntimeArgs,
) -> Result<()> {
    let images = context::images(targets, runtime)?;
    let manager = context::manager(global, false)?;

    for image in images {
        let route = AppletRoute::new(applet_id, image);
        manager.kill(&route).await?;
        println!(
            "{} Stopped {}",
            "✓".green().bold(),
            route.container_name()
        );
    }

    Ok(())
}
