//! NAM Agent Library
//!
//! Node applet manager: runs user applets as containers on this device,
//! keeps the control plane informed of what is installed and running, and
//! routes traffic and scheduled work to the applets.

pub mod agent;
pub mod applet;
pub mod cli;
pub mod connection;
pub mod control_plane;
pub mod error;
pub mod runtime;
pub mod server;

// Re-exports for convenience
pub use agent::{AppletManager, AuthOptions, RequestOptions, Route, WorkOptions};
pub use applet::{AppletImage, AppletRoute, AppletRunOptions, AppletStatus, Worker};
pub use cli::config::Config;
pub use connection::state::{ChannelState, ChannelStateManager};
pub use connection::websocket::WebSocketClient;
pub use error::{NamError, Result};
pub use runtime::adapter::RuntimeAdapter;
pub use runtime::docker::adapter::DockerAdapter;
