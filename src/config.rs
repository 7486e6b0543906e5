use std::path::PathBuf;

/// Runtime configuration assembled from the command line and handed to the
/// component constructors. No process-wide mutable state.
#[derive(Debug, Clone)]
pub struct SentryConfig {
    /// Capture device index.
    pub camera_index: i32,
    /// Requested capture resolution.
    pub frame_width: u32,
    pub frame_height: u32,
    /// Haar cascade used by the person detector.
    pub cascade_path: PathBuf,
    /// Per-pixel intensity delta treated as real change, not sensor noise.
    pub pixel_threshold: f64,
    /// Binarized diff sum above which a frame counts as motion.
    pub motion_threshold: f64,
    /// Hysteresis counter value the alarm fires above (strict).
    pub alarm_threshold: u32,
    /// Minimum detector confidence for a box to be drawn.
    pub min_confidence: f32,
    /// Start armed instead of in preview.
    pub start_armed: bool,
}

impl Default for SentryConfig {
    fn default() -> Self {
        Self {
            camera_index: 0,
            frame_width: 640,
            frame_height: 480,
            cascade_path: PathBuf::from("assets/cascades/haarcascade_fullbody.xml"),
            pixel_threshold: 25.0,
            motion_threshold: 1000.0,
            alarm_threshold: 5,
            min_confidence: 0.5,
            start_armed: false,
        }
    }
}

impl SentryConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.frame_width == 0 || self.frame_height == 0 {
            return Err("frame dimensions must be non-zero".to_string());
        }
        if !(0.0..=255.0).contains(&self.pixel_threshold) {
            return Err("pixel threshold must be within 0..=255".to_string());
        }
        if self.motion_threshold < 0.0 {
            return Err("motion threshold must be non-negative".to_string());
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err("min confidence must be within 0..=1".to_string());
        }
        Ok(())
    }
}
