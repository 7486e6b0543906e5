use crate::error::SentryError;
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::warn;

const TONE_HZ: f32 = 2500.0;
const TONE_DURATION: Duration = Duration::from_millis(1000);
/// Upper bound on tone cycles per ring session. Guarantees the worker goes
/// quiet in bounded time even if the counter never decays.
const MAX_ALARM_CYCLES: u32 = 5;

/// State shared between the watch loop and the alarm worker: the hysteresis
/// counter (loop writes, worker reads its stopping condition) and the
/// ringing flag (loop checks before triggering, worker clears on completion).
#[derive(Debug, Default)]
pub struct AlarmState {
    counter: AtomicU32,
    ringing: AtomicBool,
}

impl AlarmState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self) -> u32 {
        self.counter.load(Ordering::Relaxed)
    }

    /// Increment and return the new counter value. No upper clamp; only the
    /// threshold comparison matters.
    pub fn bump(&self) -> u32 {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Decrement, floored at zero.
    pub fn decay(&self) {
        let _ = self
            .counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| c.checked_sub(1));
    }

    pub fn reset_counter(&self) {
        self.counter.store(0, Ordering::Relaxed);
    }

    pub fn is_ringing(&self) -> bool {
        self.ringing.load(Ordering::Acquire)
    }

    /// Claim the ringing flag. Returns false if a ring session is already
    /// live.
    fn try_begin_ring(&self) -> bool {
        !self.ringing.swap(true, Ordering::AcqRel)
    }

    fn end_ring(&self) {
        self.ringing.store(false, Ordering::Release);
    }
}

/// Blocking tone output. The production implementation talks to the default
/// audio device; tests substitute a recording fake.
pub trait ToneSink: Send {
    fn play(&mut self, frequency_hz: f32, duration: Duration) -> Result<(), SentryError>;
}

/// Long-lived alarm worker fed over a channel. A single worker serializes
/// ring sessions, and `trigger` refuses while one is live, so at most one
/// alarm activity ever runs.
pub struct AlarmManager {
    tx: Sender<()>,
    state: Arc<AlarmState>,
    handle: JoinHandle<()>,
}

impl AlarmManager {
    pub fn spawn(
        state: Arc<AlarmState>,
        alarm_threshold: u32,
        mut sink: Box<dyn ToneSink>,
    ) -> std::io::Result<Self> {
        let (tx, rx): (Sender<()>, Receiver<()>) = crossbeam_channel::unbounded();
        let worker_state = Arc::clone(&state);
        let handle = thread::Builder::new().name("alarm".to_string()).spawn(move || {
            for () in rx.iter() {
                ring(&worker_state, alarm_threshold, sink.as_mut());
            }
        })?;
        Ok(Self { tx, state, handle })
    }

    /// Fire-and-forget: never blocks the watch loop. A no-op while a ring
    /// session is already live.
    pub fn trigger(&self) {
        if !self.state.try_begin_ring() {
            return;
        }
        if self.tx.send(()).is_err() {
            self.state.end_ring();
            warn!("alarm worker is gone; trigger dropped");
        }
    }

    /// Drop the trigger channel and wait for the worker to drain. Any live
    /// ring session ends within the cycle bound.
    pub fn shutdown(self) {
        drop(self.tx);
        if self.handle.join().is_err() {
            warn!("alarm worker panicked during shutdown");
        }
    }
}

fn ring(state: &AlarmState, alarm_threshold: u32, sink: &mut dyn ToneSink) {
    for _ in 0..MAX_ALARM_CYCLES {
        if state.counter() <= alarm_threshold {
            break;
        }
        warn!("alarm sounding");
        if let Err(err) = sink.play(TONE_HZ, TONE_DURATION) {
            // An alarm that fails to sound must not take detection down.
            warn!("alarm tone failed: {err}");
        }
    }
    state.end_ring();
}

/// Sine tone through the default output device.
pub struct Beeper;

impl ToneSink for Beeper {
    fn play(&mut self, frequency_hz: f32, duration: Duration) -> Result<(), SentryError> {
        use cpal::traits::{DeviceTrait, HostTrait};
        use cpal::SampleFormat;

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| SentryError::Alarm("no audio output device".to_string()))?;
        let config = device
            .default_output_config()
            .map_err(|e| SentryError::Alarm(e.to_string()))?;

        match config.sample_format() {
            SampleFormat::F32 => tone::<f32>(&device, &config.into(), frequency_hz, duration),
            SampleFormat::I16 => tone::<i16>(&device, &config.into(), frequency_hz, duration),
            SampleFormat::U16 => tone::<u16>(&device, &config.into(), frequency_hz, duration),
            other => Err(SentryError::Alarm(format!(
                "unsupported sample format {other:?}"
            ))),
        }
    }
}

fn tone<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    frequency_hz: f32,
    duration: Duration,
) -> Result<(), SentryError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    use cpal::traits::{DeviceTrait, StreamTrait};

    let sample_rate = config.sample_rate.0 as f32;
    let channels = config.channels as usize;
    let mut phase = 0.0f32;

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    let value = (phase * std::f32::consts::TAU).sin() * 0.4;
                    phase = (phase + frequency_hz / sample_rate).fract();
                    for sample in frame.iter_mut() {
                        *sample = T::from_sample(value);
                    }
                }
            },
            |err| warn!("audio stream error: {err}"),
            None,
        )
        .map_err(|e| SentryError::Alarm(e.to_string()))?;

    stream.play().map_err(|e| SentryError::Alarm(e.to_string()))?;
    thread::sleep(duration);
    Ok(())
}
