//! CLI support module
//!
//! Configuration, command-line overrides and logging setup shared by the
//! binaries.

pub mod args;
pub mod config;
pub mod logging;
