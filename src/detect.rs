use crate::error::SentryError;
use opencv::{
    core::{self, Mat, Rect, Size, Vector},
    imgproc, objdetect,
    prelude::*,
};
use std::cmp::Ordering;
use std::path::Path;

/// One detected person, box in source-frame pixel space, confidence in 0..1.
#[derive(Clone, Debug)]
pub struct Detection {
    pub rect: Rect,
    pub confidence: f32,
}

/// Opaque detector boundary: image in, scored boxes out. Constructor-injected
/// into the watch loop so the backend is swappable and testable with a fake.
pub trait PersonDetector {
    fn detect(&mut self, frame: &Mat) -> Result<Vec<Detection>, SentryError>;
}

/// Haar-cascade person detector. Level weights from the cascade are mapped
/// through a logistic so downstream confidence filtering works on 0..1.
pub struct CascadeDetector {
    classifier: objdetect::CascadeClassifier,
    scale_factor: f64,
    min_neighbors: i32,
    min_size: i32,
    nms_iou: f32,
}

impl CascadeDetector {
    pub fn new(cascade_path: &Path) -> Result<Self, SentryError> {
        if !cascade_path.is_file() {
            return Err(SentryError::Detector(format!(
                "cascade file missing: {}",
                cascade_path.display()
            )));
        }
        let path = cascade_path
            .to_str()
            .ok_or_else(|| SentryError::Detector("cascade path is not valid UTF-8".to_string()))?;
        let classifier = objdetect::CascadeClassifier::new(path)
            .map_err(|e| SentryError::Detector(format!("failed to load cascade: {e}")))?;
        Ok(Self {
            classifier,
            scale_factor: 1.1,
            min_neighbors: 6,
            min_size: 48,
            nms_iou: 0.4,
        })
    }
}

impl PersonDetector for CascadeDetector {
    fn detect(&mut self, frame: &Mat) -> Result<Vec<Detection>, SentryError> {
        let mut gray = Mat::default();
        imgproc::cvt_color(
            frame,
            &mut gray,
            imgproc::COLOR_BGR2GRAY,
            0,
            core::AlgorithmHint::ALGO_HINT_DEFAULT,
        )?;
        let mut gray_eq = Mat::default();
        imgproc::equalize_hist(&gray, &mut gray_eq)?;

        let mut rects = Vector::<Rect>::new();
        let mut reject_levels = Vector::<i32>::new();
        let mut level_weights = Vector::<f64>::new();
        self.classifier.detect_multi_scale3(
            &gray_eq,
            &mut rects,
            &mut reject_levels,
            &mut level_weights,
            self.scale_factor,
            self.min_neighbors,
            0,
            Size::new(self.min_size, self.min_size),
            Size::default(),
            true,
        )?;

        let detections: Vec<Detection> = rects
            .iter()
            .zip(level_weights.iter())
            .map(|(rect, weight)| Detection {
                rect,
                confidence: logistic(weight),
            })
            .collect();

        Ok(nms_detections(detections, self.nms_iou))
    }
}

fn logistic(weight: f64) -> f32 {
    (1.0 / (1.0 + (-weight).exp())) as f32
}

fn rect_area(rect: Rect) -> f32 {
    (rect.width.max(0) * rect.height.max(0)) as f32
}

fn rect_iou(a: Rect, b: Rect) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter_w = (x2 - x1).max(0) as f32;
    let inter_h = (y2 - y1).max(0) as f32;
    let inter_area = inter_w * inter_h;

    let union = rect_area(a) + rect_area(b) - inter_area;
    if union <= 0.0 {
        0.0
    } else {
        inter_area / union
    }
}

/// Greedy NMS, highest confidence first.
fn nms_detections(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::new();
    for detection in detections {
        if keep
            .iter()
            .all(|kept| rect_iou(detection.rect, kept.rect) <= iou_threshold)
        {
            keep.push(detection);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: i32, y: i32, w: i32, h: i32, confidence: f32) -> Detection {
        Detection {
            rect: Rect::new(x, y, w, h),
            confidence,
        }
    }

    #[test]
    fn iou_of_identical_rects_is_one() {
        let r = Rect::new(10, 10, 40, 80);
        assert!((rect_iou(r, r) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn iou_of_disjoint_rects_is_zero() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(100, 100, 10, 10);
        assert_eq!(rect_iou(a, b), 0.0);
    }

    #[test]
    fn nms_keeps_highest_confidence_of_an_overlapping_pair() {
        let detections = vec![
            det(0, 0, 40, 80, 0.6),
            det(2, 2, 40, 80, 0.9),
            det(200, 0, 40, 80, 0.7),
        ];
        let kept = nms_detections(detections, 0.4);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.9).abs() < f32::EPSILON);
        assert!((kept[1].confidence - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn logistic_maps_weights_into_unit_interval() {
        assert!((logistic(0.0) - 0.5).abs() < 1e-6);
        assert!(logistic(6.0) > 0.99);
        assert!(logistic(-6.0) < 0.01);
    }

    #[test]
    fn missing_cascade_file_is_a_detector_error() {
        let err = CascadeDetector::new(Path::new("/nonexistent/cascade.xml")).unwrap_err();
        assert!(matches!(err, SentryError::Detector(_)));
    }
}
