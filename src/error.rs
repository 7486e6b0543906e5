use thiserror::Error;

#[derive(Error, Debug)]
pub enum SentryError {
    /// Capture device could not be opened. Fatal at startup.
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A frame read failed mid-run. Terminal for the watch loop; a failing
    /// camera must halt visibly rather than degrade silently.
    #[error("frame read failed: {0}")]
    ReadFailure(String),

    /// Malformed frame reached the processor. Logic error, not retried.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("person detector error: {0}")]
    Detector(String),

    #[error("alarm output error: {0}")]
    Alarm(String),

    #[error("opencv error: {0}")]
    OpenCv(String),
}

impl From<opencv::Error> for SentryError {
    fn from(err: opencv::Error) -> Self {
        SentryError::OpenCv(err.message)
    }
}
