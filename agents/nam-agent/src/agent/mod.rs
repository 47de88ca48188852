//! Agent module
//!
//! The applet manager and everything it does on the local engine: environment
//! bootstrap, applet lifecycle, routing, worker crons and control plane sync.

pub mod cron;
pub mod environment;
pub mod lifecycle;
pub mod manager;
pub mod options;
pub mod routing;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use manager::{AppletManager, AuthOptions};
pub use routing::{RequestOptions, Route, WorkOptions};
