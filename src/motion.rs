use crate::alarm::AlarmState;
use crate::config::SentryConfig;
use crate::error::SentryError;
use opencv::{
    core::{self, Mat},
    imgproc,
};
use std::sync::Arc;
use tracing::info;

/// Sum of binarized per-pixel absolute differences between two processed
/// frames. A pixel whose delta is below `pixel_threshold` contributes 0; at
/// or above it contributes 255, so small sensor noise vanishes while a
/// moving body lights up a contiguous region.
pub fn motion_score(
    current: &Mat,
    reference: &Mat,
    pixel_threshold: f64,
) -> Result<f64, SentryError> {
    let mut diff = Mat::default();
    core::absdiff(current, reference, &mut diff)?;

    let mut binarized = Mat::default();
    imgproc::threshold(
        &diff,
        &mut binarized,
        pixel_threshold,
        255.0,
        imgproc::THRESH_BINARY,
    )?;

    let sum = core::sum_elems(&binarized)?;
    Ok(sum[0])
}

/// Scores each processed frame against a sliding reference and drives the
/// hysteresis counter shared with the alarm worker.
///
/// The counter climbs on every motion-positive frame but decays only one
/// step per motion-negative frame (floor 0, no upper clamp), so a brief
/// pause in motion does not immediately clear a building alarm.
pub struct MotionDetector {
    pixel_threshold: f64,
    motion_threshold: f64,
    alarm_threshold: u32,
    reference: Mat,
    state: Arc<AlarmState>,
}

impl MotionDetector {
    pub fn new(config: &SentryConfig, reference: Mat, state: Arc<AlarmState>) -> Self {
        Self {
            pixel_threshold: config.pixel_threshold,
            motion_threshold: config.motion_threshold,
            alarm_threshold: config.alarm_threshold,
            reference,
            state,
        }
    }

    /// Score `processed` against the stored reference, update the counter,
    /// then slide the reference forward to `processed`.
    pub fn observe(&mut self, processed: Mat) -> Result<f64, SentryError> {
        let score = motion_score(&processed, &self.reference, self.pixel_threshold)?;

        if score > self.motion_threshold {
            let counter = self.state.bump();
            info!("motion detected (score {score:.0}, counter {counter})");
        } else {
            self.state.decay();
        }

        self.reference = processed;
        Ok(score)
    }

    /// Strictly above the alarm threshold.
    pub fn in_alarm_condition(&self) -> bool {
        self.state.counter() > self.alarm_threshold
    }

    pub fn counter(&self) -> u32 {
        self.state.counter()
    }

    /// Reset hysteresis and reseed the reference. Called on every mode
    /// transition so stale evidence never carries across modes.
    pub fn rearm(&mut self, reference: Mat) {
        self.state.reset_counter();
        self.reference = reference;
    }
}
