use crate::error::SentryError;
use opencv::{core::Mat, prelude::*, videoio};

/// Capture device boundary. The watch loop only ever pulls one frame at a
/// time and releases the device exactly once at shutdown.
pub trait FrameSource {
    fn read(&mut self) -> Result<Mat, SentryError>;
    fn release(&mut self) -> Result<(), SentryError>;
}

pub struct CameraSource {
    capture: videoio::VideoCapture,
}

impl CameraSource {
    pub fn open(index: i32, width: u32, height: u32) -> Result<Self, SentryError> {
        let mut capture = videoio::VideoCapture::new(index, videoio::CAP_ANY)
            .map_err(|e| SentryError::DeviceUnavailable(format!("camera {index}: {e}")))?;
        if !capture
            .is_opened()
            .map_err(|e| SentryError::DeviceUnavailable(format!("camera {index}: {e}")))?
        {
            return Err(SentryError::DeviceUnavailable(format!(
                "camera {index} failed to open"
            )));
        }

        capture.set(videoio::CAP_PROP_FRAME_WIDTH, width as f64)?;
        capture.set(videoio::CAP_PROP_FRAME_HEIGHT, height as f64)?;

        Ok(Self { capture })
    }
}

impl FrameSource for CameraSource {
    fn read(&mut self) -> Result<Mat, SentryError> {
        let mut frame = Mat::default();
        let grabbed = self
            .capture
            .read(&mut frame)
            .map_err(|e| SentryError::ReadFailure(e.message))?;
        if !grabbed || frame.empty() {
            return Err(SentryError::ReadFailure(
                "camera returned no frame".to_string(),
            ));
        }
        Ok(frame)
    }

    fn release(&mut self) -> Result<(), SentryError> {
        self.capture.release()?;
        Ok(())
    }
}
