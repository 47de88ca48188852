//! Docker Runtime Module
//!
//! bollard-backed engine for the applet network, images and containers.

pub mod adapter;

pub use adapter::DockerAdapter;
