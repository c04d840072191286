//! Bridges the V4L2 camera to the session's frame source.

use facecheck_core::{CaptureError, FrameSource};
use facecheck_hw::Camera;
use image::RgbImage;

/// A [`Camera`] feeding a verification session. Dropping it releases the device.
pub struct LiveCamera(Camera);

impl FrameSource for LiveCamera {
    fn next_frame(&mut self) -> Result<RgbImage, CaptureError> {
        self.0
            .capture_frame()
            .map(|frame| frame.into_image())
            .map_err(|e| CaptureError::Read(e.to_string()))
    }
}

/// Opener for the session: the device is only touched once the loop starts.
pub fn opener(device: String) -> impl FnMut() -> Result<LiveCamera, CaptureError> {
    move || {
        Camera::open(&device)
            .map(LiveCamera)
            .map_err(|e| CaptureError::Open(e.to_string()))
    }
}
