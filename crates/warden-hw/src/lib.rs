//! warden-hw: camera capture and the indicator link.
//!
//! Frames come from a V4L2 device. The indicator is a microcontroller on a
//! serial line driven by one-byte commands; without it the link simulates.

pub mod actuation;
pub mod camera;
pub mod frame;
pub mod link;

pub use actuation::{ActuationController, DeactivationTimer, DEFAULT_DEACTIVATE_AFTER};
pub use camera::{Camera, CameraError, PixelFormat};
pub use frame::{Frame, FrameSource};
pub use link::{Command, Delivery, HardwareLink, LinkConfig, LinkError};
