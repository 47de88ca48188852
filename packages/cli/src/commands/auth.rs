use anyhow::{bail, Result};
use colored::Colorize;
use dialoguer::{Input, Password};

use nam_agent::cli::args::GlobalArgs;
use nam_agent::control_plane::device::host_name;
use nam_agent::{AuthOptions, NamError};

use crate::context;

/// Handle the auth command
pub async fn run(global: &GlobalArgs) -> Result<()> {
    println!("{}", "Nodeswork Login".bold());
    println!();

    let manager = context::manager(global, false)?;

    let email: String = Input::new()
        .with_prompt("Email")
        .validate_with(|input: &String| -> std::result::Result<(), &str> {
            if valid_email(input) {
                Ok(())
            } else {
                Err("Enter your email address")
            }
        })
        .interact_text()?;

    let password: String = Password::new().with_prompt("Password").interact()?;

    let device_name: String = Input::new()
        .with_prompt("Device name")
        .default(host_name())
        .validate_with(|input: &String| -> std::result::Result<(), &str> {
            if valid_device_name(input) {
                Ok(())
            } else {
                Err("Device name must be only letters, numbers, spaces, or dashes")
            }
        })
        .interact_text()?;

    let auth = AuthOptions {
        email,
        password,
        device_name,
    };
    match manager.authenticate(&auth).await {
        Ok(()) => {}
        Err(NamError::WrongPassword) => bail!("Password is not correct"),
        Err(NamError::WrongEmail) => bail!("Email {} is not registered", auth.email),
        Err(e) => return Err(e.into()),
    }

    println!();
    println!(
        "{} Device {} registered with {}",
        "✓".green().bold(),
        auth.device_name,
        manager.config().nodeswork_server
    );

    Ok(())
}

fn valid_email(input: &str) -> bool {
    !input.is_empty()
        && input
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '-'))
}

fn valid_device_name(input: &str) -> bool {
    !input.trim().is_empty()
        && input
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | ' ' | '-'))
}
