use crate::detect::Detection;
use crate::error::SentryError;
use opencv::{
    core::{Mat, Point, Scalar},
    highgui, imgproc,
};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    Quit,
    ToggleMode,
}

/// Render/input boundary: show a frame, poll for a key this tick.
pub trait Display {
    fn show(&mut self, frame: &Mat) -> Result<(), SentryError>;
    fn poll_key(&mut self) -> Result<Option<KeyEvent>, SentryError>;
    fn close(&mut self) -> Result<(), SentryError> {
        Ok(())
    }
}

pub struct Window {
    name: String,
}

impl Window {
    pub fn new(name: &str) -> Result<Self, SentryError> {
        highgui::named_window(name, highgui::WINDOW_AUTOSIZE)?;
        Ok(Self {
            name: name.to_string(),
        })
    }
}

impl Display for Window {
    fn show(&mut self, frame: &Mat) -> Result<(), SentryError> {
        highgui::imshow(&self.name, frame)?;
        Ok(())
    }

    fn poll_key(&mut self) -> Result<Option<KeyEvent>, SentryError> {
        match highgui::wait_key(1)? {
            27 | 113 => Ok(Some(KeyEvent::Quit)), // ESC or 'q'
            116 => Ok(Some(KeyEvent::ToggleMode)), // 't'
            _ => Ok(None),
        }
    }

    fn close(&mut self) -> Result<(), SentryError> {
        highgui::destroy_all_windows()?;
        Ok(())
    }
}

pub fn draw_detections(frame: &mut Mat, detections: &[Detection]) -> Result<(), SentryError> {
    let color = Scalar::new(0.0, 255.0, 0.0, 0.0);
    for detection in detections {
        imgproc::rectangle(frame, detection.rect, color, 2, imgproc::LINE_8, 0)?;
        let label = format!("person {:.2}", detection.confidence);
        let origin = Point::new(detection.rect.x, detection.rect.y.saturating_sub(6));
        imgproc::put_text(
            frame,
            &label,
            origin,
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.5,
            color,
            1,
            imgproc::LINE_8,
            false,
        )?;
    }
    Ok(())
}

pub fn draw_hud(
    frame: &mut Mat,
    status: &str,
    start_time: Instant,
    frame_index: u64,
) -> Result<(), SentryError> {
    let elapsed = start_time.elapsed().as_secs_f64();
    let fps = if elapsed > 0.0 {
        frame_index as f64 / elapsed
    } else {
        0.0
    };

    let color = Scalar::new(0.0, 255.0, 0.0, 0.0);
    let text = format!("{status} | FPS: {fps:.1}");
    imgproc::put_text(
        frame,
        &text,
        Point::new(10, 24),
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.6,
        color,
        2,
        imgproc::LINE_8,
        false,
    )?;
    Ok(())
}
