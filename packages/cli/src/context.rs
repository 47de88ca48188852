//! Shared setup for commands: configuration, logging and the manager.

use anyhow::{bail, Context, Result};
use std::sync::Arc;

use nam_agent::applet::parse_target;
use nam_agent::cli::args::GlobalArgs;
use nam_agent::cli::logging;
use nam_agent::{AppletImage, AppletManager, Config};

use crate::RuntimeArgs;

/// Resolve configuration and build the manager.
///
/// Console logging is only installed with `--debug` (or when `log` is set),
/// so command output stays readable.
pub fn manager(global: &GlobalArgs, log: bool) -> Result<Arc<AppletManager>> {
    let config = config(global)?;
    if log || config.debug {
        logging::init(&config)?;
    }
    AppletManager::from_config(config).context("Failed to initialize applet manager")
}

pub fn config(global: &GlobalArgs) -> Result<Config> {
    global.resolve().context("Failed to load configuration")
}

/// Parse `<package>@<version>` targets into images of the given runtime.
pub fn images(targets: &[String], runtime: &RuntimeArgs) -> Result<Vec<AppletImage>> {
    targets
        .iter()
        .map(|target| match parse_target(target) {
            Some((package_name, version)) => Ok(AppletImage::new(
                runtime.na_type.clone(),
                runtime.na_version.clone(),
                package_name,
                version,
            )),
            None => bail!("invalid target {}", target),
        })
        .collect()
}
