//! facecheck-hw — V4L2 camera capture.
//!
//! Opens a webcam, negotiates a pixel format and hands out frames already
//! converted to RGB8.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::{Frame, FrameError};
