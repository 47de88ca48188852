pub mod applets;
pub mod auth;
pub mod daemon;
pub mod install;
pub mod kill;
pub mod ps;
pub mod run;

use indicatif::{ProgressBar, ProgressStyle};

pub(crate) fn spinner(message: String) -> anyhow::Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
            .template("{spinner:.blue} {msg}")?,
    );
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));
    spinner.set_message(message);
    Ok(spinner)
}
