//! Control plane module
//!
//! Outbound HTTP calls to the control plane and the package registry.

pub mod client;
pub mod device;
pub mod registry;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use client::{ControlPlane, HttpControlPlane};
pub use registry::{NpmRegistry, ReleaseFeed};
