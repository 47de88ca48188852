//! Connection module
//!
//! The device socket: a long-lived channel over which the control plane
//! invokes applet operations on this agent.

pub mod dispatch;
pub mod protocol;
pub mod state;
pub mod websocket;
