//! Runtime module
//!
//! This module provides the container engine abstraction used by the applet
//! manager, through the RuntimeAdapter trait.

pub mod adapter;
pub mod docker;

#[cfg(test)]
pub(crate) mod mock;
