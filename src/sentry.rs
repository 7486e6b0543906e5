use crate::alarm::AlarmManager;
use crate::camera::FrameSource;
use crate::config::SentryConfig;
use crate::detect::{Detection, PersonDetector};
use crate::display::{self, Display, KeyEvent};
use crate::error::SentryError;
use crate::frame;
use crate::motion::MotionDetector;
use opencv::core::Mat;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Camera previews; no detection runs.
    Preview,
    /// Motion and person detection active.
    Armed,
}

/// The watch loop: capture → process → detect motion → (optionally detect
/// persons) → render → poll input, every iteration. Owns the mode state
/// machine and the reference-frame update policy; the alarm runs on its own
/// worker and never blocks this loop.
pub struct Sentry<S, D, W> {
    config: SentryConfig,
    source: S,
    persons: D,
    display: W,
    motion: MotionDetector,
    alarm: AlarmManager,
    mode: Mode,
}

impl<S, D, W> Sentry<S, D, W>
where
    S: FrameSource,
    D: PersonDetector,
    W: Display,
{
    pub fn new(
        config: SentryConfig,
        source: S,
        persons: D,
        display: W,
        motion: MotionDetector,
        alarm: AlarmManager,
    ) -> Self {
        let mode = if config.start_armed {
            Mode::Armed
        } else {
            Mode::Preview
        };
        Self {
            config,
            source,
            persons,
            display,
            motion,
            alarm,
            mode,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Run until the quit key, the stop flag, or a read failure. Read
    /// failures are terminal and propagate: a camera that stops producing
    /// frames must halt the watch visibly, never degrade silently.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<(), SentryError> {
        info!("security watch started ({:?})", self.mode);
        let start_time = Instant::now();
        let mut frame_index: u64 = 0;

        while !stop.load(Ordering::Relaxed) {
            let raw = self.source.read()?;
            frame_index += 1;

            // Overlays go on a copy; the raw frame stays pristine for
            // detection and for reseeding the reference on a toggle.
            let mut canvas = raw.clone();
            let status = match self.mode {
                Mode::Preview => "PREVIEW".to_string(),
                Mode::Armed => self.step_armed(&raw, &mut canvas)?,
            };

            display::draw_hud(&mut canvas, &status, start_time, frame_index)?;
            self.display.show(&canvas)?;

            match self.display.poll_key()? {
                Some(KeyEvent::Quit) => {
                    info!("quit requested");
                    break;
                }
                Some(KeyEvent::ToggleMode) => self.toggle(&raw)?,
                None => {}
            }
        }
        Ok(())
    }

    /// One armed iteration: score motion, then either overlay persons (calm
    /// frames) or trigger the alarm (sustained motion). The detector is
    /// skipped during a live motion spike; those cycles would be wasted on
    /// frames the alarm already accounts for.
    fn step_armed(&mut self, raw: &Mat, canvas: &mut Mat) -> Result<String, SentryError> {
        let processed = frame::process(raw)?;
        let score = self.motion.observe(processed)?;

        if self.motion.in_alarm_condition() {
            self.alarm.trigger();
        } else {
            match self.persons.detect(raw) {
                Ok(detections) => {
                    let confident: Vec<Detection> = detections
                        .into_iter()
                        .filter(|d| d.confidence >= self.config.min_confidence)
                        .collect();
                    display::draw_detections(canvas, &confident)?;
                }
                // An overlay hiccup must not halt the watch.
                Err(err) => warn!("person detection failed: {err}"),
            }
        }

        Ok(format!(
            "ARMED | score {score:.0} | counter {}",
            self.motion.counter()
        ))
    }

    fn toggle(&mut self, raw: &Mat) -> Result<(), SentryError> {
        self.mode = match self.mode {
            Mode::Preview => Mode::Armed,
            Mode::Armed => Mode::Preview,
        };
        // Fresh reference and a zeroed counter: stale hysteresis must not
        // carry across mode changes.
        let reference = frame::process(raw)?;
        self.motion.rearm(reference);
        info!("mode toggled to {:?}", self.mode);
        Ok(())
    }

    /// Release the capture device (exactly once — this consumes the loop),
    /// close the display, and join the alarm worker. Runs on every exit
    /// path, normal or not.
    pub fn shutdown(mut self) -> Result<(), SentryError> {
        let released = self.source.release();
        if let Err(err) = self.display.close() {
            warn!("failed to close display: {err}");
        }
        self.alarm.shutdown();
        info!("security watch stopped");
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::{AlarmState, ToneSink};
    use opencv::core::{self, Rect, Scalar};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn bgr(value: f64) -> Mat {
        Mat::new_rows_cols_with_default(48, 64, core::CV_8UC3, Scalar::all(value)).unwrap()
    }

    struct ScriptedSource {
        frames: VecDeque<Result<Mat, SentryError>>,
        releases: Arc<AtomicU32>,
    }

    impl FrameSource for ScriptedSource {
        fn read(&mut self) -> Result<Mat, SentryError> {
            self.frames
                .pop_front()
                .unwrap_or_else(|| Err(SentryError::ReadFailure("script exhausted".to_string())))
        }

        fn release(&mut self) -> Result<(), SentryError> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct ScriptedDisplay {
        keys: VecDeque<Option<KeyEvent>>,
    }

    impl Display for ScriptedDisplay {
        fn show(&mut self, _frame: &Mat) -> Result<(), SentryError> {
            Ok(())
        }

        fn poll_key(&mut self) -> Result<Option<KeyEvent>, SentryError> {
            // Quit once the script runs dry so every test terminates.
            Ok(self.keys.pop_front().unwrap_or(Some(KeyEvent::Quit)))
        }
    }

    struct FakePersons {
        calls: Arc<AtomicU32>,
    }

    impl PersonDetector for FakePersons {
        fn detect(&mut self, _frame: &Mat) -> Result<Vec<Detection>, SentryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Detection {
                rect: Rect::new(4, 4, 16, 32),
                confidence: 0.9,
            }])
        }
    }

    struct SilentSink {
        plays: Arc<AtomicU32>,
    }

    impl ToneSink for SilentSink {
        fn play(&mut self, _f: f32, _d: Duration) -> Result<(), SentryError> {
            self.plays.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Harness {
        state: Arc<AlarmState>,
        releases: Arc<AtomicU32>,
        detect_calls: Arc<AtomicU32>,
        plays: Arc<AtomicU32>,
    }

    fn build(
        frames: Vec<Result<Mat, SentryError>>,
        keys: Vec<Option<KeyEvent>>,
        start_armed: bool,
    ) -> (
        Sentry<ScriptedSource, FakePersons, ScriptedDisplay>,
        Harness,
    ) {
        let config = SentryConfig {
            start_armed,
            ..SentryConfig::default()
        };
        let harness = Harness {
            state: Arc::new(AlarmState::new()),
            releases: Arc::new(AtomicU32::new(0)),
            detect_calls: Arc::new(AtomicU32::new(0)),
            plays: Arc::new(AtomicU32::new(0)),
        };

        let reference = frame::process(&bgr(0.0)).unwrap();
        let motion = MotionDetector::new(&config, reference, Arc::clone(&harness.state));
        let alarm = AlarmManager::spawn(
            Arc::clone(&harness.state),
            config.alarm_threshold,
            Box::new(SilentSink {
                plays: Arc::clone(&harness.plays),
            }),
        )
        .unwrap();

        let sentry = Sentry::new(
            config,
            ScriptedSource {
                frames: frames.into(),
                releases: Arc::clone(&harness.releases),
            },
            FakePersons {
                calls: Arc::clone(&harness.detect_calls),
            },
            ScriptedDisplay { keys: keys.into() },
            motion,
            alarm,
        );
        (sentry, harness)
    }

    /// Alternating white/black frames: every frame differs from the sliding
    /// reference (seeded black), so each one is motion-positive.
    fn alternating(n: usize) -> Vec<Result<Mat, SentryError>> {
        (0..n)
            .map(|i| Ok(bgr(if i % 2 == 0 { 255.0 } else { 0.0 })))
            .collect()
    }

    fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn alarm_fires_on_the_sixth_positive_frame() {
        // Threshold 5: counter reaches 6 on the sixth motion-positive frame
        // and the alarm is triggered exactly there.
        let frames = alternating(6);
        let keys = vec![None; 5];

        let (mut sentry, harness) = build(frames, keys, true);
        let stop = AtomicBool::new(false);
        sentry.run(&stop).unwrap();

        assert_eq!(harness.state.counter(), 6);
        // The counter never decays after the run, so the ring session must
        // complete its bounded cycles and clear the flag.
        assert!(wait_until(Duration::from_secs(2), || {
            !harness.state.is_ringing()
        }));
        assert!(harness.plays.load(Ordering::SeqCst) >= 1);
        // Detection ran on the five calm iterations, not the in-alarm one.
        assert_eq!(harness.detect_calls.load(Ordering::SeqCst), 5);

        sentry.shutdown().unwrap();
        assert_eq!(harness.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn counter_decays_and_clamps_after_motion_stops() {
        // 6 positives then 8 negatives: 6 - 8 clamps at 0.
        let mut frames = alternating(6);
        frames.extend((0..8).map(|_| Ok(bgr(0.0))));
        let keys = vec![None; 13];

        let (mut sentry, harness) = build(frames, keys, true);
        let stop = AtomicBool::new(false);
        sentry.run(&stop).unwrap();

        assert_eq!(harness.state.counter(), 0);
        // Detection was skipped only on the single in-alarm iteration.
        assert_eq!(harness.detect_calls.load(Ordering::SeqCst), 13);

        sentry.shutdown().unwrap();
        assert_eq!(harness.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn identical_frames_never_alarm() {
        let frames = (0..10).map(|_| Ok(bgr(0.0))).collect();
        let keys = vec![None; 9];

        let (mut sentry, harness) = build(frames, keys, true);
        let stop = AtomicBool::new(false);
        sentry.run(&stop).unwrap();

        assert_eq!(harness.state.counter(), 0);
        assert!(!harness.state.is_ringing());
        assert_eq!(harness.plays.load(Ordering::SeqCst), 0);
        assert_eq!(harness.detect_calls.load(Ordering::SeqCst), 10);
        sentry.shutdown().unwrap();
    }

    #[test]
    fn read_failure_is_terminal_and_releases_the_device_once() {
        let mut frames: Vec<Result<Mat, SentryError>> = (0..9).map(|_| Ok(bgr(0.0))).collect();
        frames.push(Err(SentryError::ReadFailure("camera gone".to_string())));
        let keys = vec![None; 20];

        let (mut sentry, harness) = build(frames, keys, true);
        let stop = AtomicBool::new(false);
        let err = sentry.run(&stop).unwrap_err();
        assert!(matches!(err, SentryError::ReadFailure(_)));

        sentry.shutdown().unwrap();
        assert_eq!(harness.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn toggle_resets_the_counter_and_switches_mode() {
        // 4 motion-positive frames build the counter, then 't' drops to
        // preview; the two preview frames run no detection.
        let mut frames = alternating(4);
        frames.extend((0..2).map(|_| Ok(bgr(0.0))));
        let keys = vec![None, None, None, Some(KeyEvent::ToggleMode), None];

        let (mut sentry, harness) = build(frames, keys, true);
        let stop = AtomicBool::new(false);
        sentry.run(&stop).unwrap();

        assert_eq!(sentry.mode(), Mode::Preview);
        assert_eq!(harness.state.counter(), 0);
        // Only the four armed iterations ran the detector.
        assert_eq!(harness.detect_calls.load(Ordering::SeqCst), 4);
        sentry.shutdown().unwrap();
    }

    #[test]
    fn toggle_into_armed_reseeds_the_reference() {
        // Preview start, frames already white. Arming must reseed the
        // reference from the current frame, so the identical frame after the
        // toggle scores no motion.
        let frames = vec![Ok(bgr(255.0)), Ok(bgr(255.0)), Ok(bgr(255.0))];
        let keys = vec![Some(KeyEvent::ToggleMode), None];

        let (mut sentry, harness) = build(frames, keys, false);
        let stop = AtomicBool::new(false);
        sentry.run(&stop).unwrap();

        assert_eq!(sentry.mode(), Mode::Armed);
        assert_eq!(harness.state.counter(), 0);
        sentry.shutdown().unwrap();
    }

    #[test]
    fn stop_flag_exits_at_the_iteration_boundary() {
        let frames = (0..5).map(|_| Ok(bgr(0.0))).collect();
        let keys = vec![None; 5];

        let (mut sentry, harness) = build(frames, keys, true);
        let stop = AtomicBool::new(true);
        sentry.run(&stop).unwrap();

        // The flag was observed before the first read; nothing ran.
        assert_eq!(harness.detect_calls.load(Ordering::SeqCst), 0);
        sentry.shutdown().unwrap();
        assert_eq!(harness.releases.load(Ordering::SeqCst), 1);
    }
}
