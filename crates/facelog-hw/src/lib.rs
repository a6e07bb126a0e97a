//! facelog-hw — Webcam capture for the recognition loop.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, FrameStream, PixelFormat};
pub use frame::Frame;
