//! Applet module
//!
//! Identity types for applets and the naming convention shared by images,
//! containers, and routes.

pub mod image;

pub use image::{
    applet_id_from_container, parse_applet_image, parse_target, AppletImage, AppletRoute,
    AppletRunOptions, AppletStatus, Worker,
};
