use serde::{Deserialize, Serialize};

use crate::geometry::{iou, BBox};

/// Class name the learned detector uses for people.
pub const PERSON_CLASS: &str = "person";
/// Numeric class id for people when a model ships without a label table.
pub const PERSON_CLASS_ID: &str = "0";

/// One detected object in pixel coordinates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BBox,
    pub class: String,
    /// Backend score. Learned backends report `[0, 1]`; the classical
    /// backend reports the raw SVM margin.
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: BBox, class: impl Into<String>, confidence: f32) -> Self {
        Self {
            bbox,
            class: class.into(),
            confidence,
        }
    }

    pub fn person(bbox: BBox, confidence: f32) -> Self {
        Self::new(bbox, PERSON_CLASS, confidence)
    }

    /// People are reported either by name or by the bare class id `0`.
    pub fn is_person(&self) -> bool {
        self.class == PERSON_CLASS || self.class == PERSON_CLASS_ID
    }
}

/// Split detections into person boxes and everything else, keeping order.
pub fn partition_persons(detections: &[Detection]) -> (Vec<BBox>, Vec<&Detection>) {
    let mut persons = Vec::new();
    let mut others = Vec::new();
    for det in detections {
        if det.is_person() {
            persons.push(det.bbox);
        } else {
            others.push(det);
        }
    }
    (persons, others)
}

/// Greedy per-class non-maximum suppression. Highest confidence wins.
pub fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for det in detections {
        let suppressed = kept
            .iter()
            .any(|k| k.class == det.class && iou(&k.bbox, &det.bbox) > iou_threshold);
        if !suppressed {
            kept.push(det);
        }
    }
    kept
}
