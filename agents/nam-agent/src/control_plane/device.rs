//! Device identity collected at registration time.

use sha2::{Digest, Sha256};
use sysinfo::System;

use crate::control_plane::types::DeviceRegistration;

/// Platform machine identifier; falls back to the hostname.
pub fn machine_id() -> String {
    machine_uid::get()
        .ok()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(host_name)
}

pub fn host_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Device identifier: hash of the machine id and the account email.
pub fn device_identifier(machine_id: &str, email: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(machine_id.as_bytes());
    hasher.update(email.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn operating_system() -> &'static str {
    match std::env::consts::OS {
        "macos" => "MacOS",
        "windows" => "Windows",
        "linux" => "Linux",
        other => other,
    }
}

/// Kernel release, e.g. `6.1.0-18-amd64`.
pub fn os_release() -> String {
    System::kernel_version().unwrap_or_else(|| "unknown".to_string())
}

/// Registration body for this machine.
pub fn registration(email: &str, device_name: &str) -> DeviceRegistration {
    DeviceRegistration {
        device_type: "UserDevice".to_string(),
        device_identifier: device_identifier(&machine_id(), email),
        os: operating_system().to_string(),
        os_version: os_release(),
        container_version: env!("CARGO_PKG_VERSION").to_string(),
        name: device_name.to_string(),
    }
}
