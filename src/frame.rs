use crate::error::SentryError;
use opencv::{
    core::{self, Mat, Size},
    imgproc,
    prelude::*,
};

/// Width every frame is normalized to before comparison.
const PROCESS_WIDTH: i32 = 500;
/// Blur kernel, sized to swallow sensor noise.
const BLUR_KERNEL: i32 = 21;

/// Normalize a captured frame for motion comparison: downsample to a fixed
/// width preserving aspect ratio, convert to grayscale, blur. Deterministic;
/// the raw frame is left untouched for display and person detection.
pub fn process(frame: &Mat) -> Result<Mat, SentryError> {
    if frame.empty() || frame.cols() == 0 || frame.rows() == 0 {
        return Err(SentryError::InvalidFrame(
            "empty frame reached the processor".to_string(),
        ));
    }

    let scale = PROCESS_WIDTH as f64 / frame.cols() as f64;
    let height = (frame.rows() as f64 * scale).round() as i32;

    let mut resized = Mat::default();
    imgproc::resize(
        frame,
        &mut resized,
        Size::new(PROCESS_WIDTH, height.max(1)),
        0.0,
        0.0,
        imgproc::INTER_AREA,
    )?;

    let mut gray = Mat::default();
    imgproc::cvt_color(
        &resized,
        &mut gray,
        imgproc::COLOR_BGR2GRAY,
        0,
        core::AlgorithmHint::ALGO_HINT_DEFAULT,
    )?;

    let mut blurred = Mat::default();
    imgproc::gaussian_blur(
        &gray,
        &mut blurred,
        Size::new(BLUR_KERNEL, BLUR_KERNEL),
        0.0,
        0.0,
        core::BORDER_DEFAULT,
        core::AlgorithmHint::ALGO_HINT_DEFAULT,
    )?;

    Ok(blurred)
}
