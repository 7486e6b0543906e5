mod alarm;
mod camera;
mod config;
mod detect;
mod display;
mod error;
mod frame;
mod motion;
mod sentry;

use crate::alarm::{AlarmManager, AlarmState, Beeper};
use crate::camera::{CameraSource, FrameSource};
use crate::config::SentryConfig;
use crate::detect::CascadeDetector;
use crate::display::Window;
use crate::motion::MotionDetector;
use crate::sentry::Sentry;
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "camsentry", about = "Motion-triggered security camera with a person overlay")]
struct Args {
    /// Capture device index
    #[arg(long, default_value_t = 0)]
    camera: i32,
    /// Requested capture width
    #[arg(long, default_value_t = 640)]
    width: u32,
    /// Requested capture height
    #[arg(long, default_value_t = 480)]
    height: u32,
    /// Haar cascade for the person overlay
    #[arg(long, default_value = "assets/cascades/haarcascade_fullbody.xml")]
    cascade: PathBuf,
    /// Per-pixel intensity delta treated as real change, not sensor noise
    #[arg(long, default_value_t = 25.0)]
    pixel_threshold: f64,
    /// Binarized diff sum above which a frame counts as motion
    #[arg(long, default_value_t = 1000.0)]
    motion_threshold: f64,
    /// Hysteresis count the alarm fires above
    #[arg(long, default_value_t = 5)]
    alarm_threshold: u32,
    /// Minimum confidence for a person box to be drawn
    #[arg(long, default_value_t = 0.5)]
    min_confidence: f32,
    /// Start armed instead of previewing
    #[arg(long)]
    armed: bool,
}

impl From<Args> for SentryConfig {
    fn from(args: Args) -> Self {
        SentryConfig {
            camera_index: args.camera,
            frame_width: args.width,
            frame_height: args.height,
            cascade_path: args.cascade,
            pixel_threshold: args.pixel_threshold,
            motion_threshold: args.motion_threshold,
            alarm_threshold: args.alarm_threshold,
            min_confidence: args.min_confidence,
            start_armed: args.armed,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();
    let args = Args::parse();
    run(SentryConfig::from(args))
}

fn run(config: SentryConfig) -> Result<()> {
    config.validate().map_err(|e| anyhow!(e))?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            info!("interrupt received, shutting down");
            stop.store(true, Ordering::Relaxed);
        })
        .context("failed to install interrupt handler")?;
    }

    let mut source =
        CameraSource::open(config.camera_index, config.frame_width, config.frame_height)
            .context("could not open capture device")?;
    info!(
        "camera {} opened at {}x{}",
        config.camera_index, config.frame_width, config.frame_height
    );

    // Seed the reference frame before the loop starts; a camera that cannot
    // produce a first frame is as fatal as one that cannot open.
    let first = source.read().context("could not read initial frame")?;
    let reference = frame::process(&first).context("could not process initial frame")?;

    let state = Arc::new(AlarmState::new());
    let motion = MotionDetector::new(&config, reference, Arc::clone(&state));
    let alarm = AlarmManager::spawn(Arc::clone(&state), config.alarm_threshold, Box::new(Beeper))
        .context("failed to spawn alarm worker")?;
    let persons = CascadeDetector::new(&config.cascade_path)?;
    let window = Window::new("camsentry")?;

    let mut sentry = Sentry::new(config, source, persons, window, motion, alarm);
    let outcome = sentry.run(&stop);
    if let Err(err) = sentry.shutdown() {
        warn!("cleanup failed: {err}");
    }
    outcome.context("security watch stopped on error")
}
