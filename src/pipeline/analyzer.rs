//! Per-frame analytics: detect, recognise, alert, annotate, encode.
//!
//! Runs synchronously on the producer thread. All analytic state (motion
//! baseline, fall counters, cooldowns) lives here and has exactly one owner.

use std::sync::Arc;

use anyhow::Result;
use image::RgbImage;

use crate::actions::{ActionEvent, ActionRecognizer};
use crate::alert::{AlertEvent, Notifier, NotifyOutcome, INTRUDER_LABEL};
use crate::detect::{partition_persons, Detection, DetectorBackend};
use crate::error::SentryError;
use crate::frame::{EncodedFrame, Frame, DEFAULT_JPEG_QUALITY};
use crate::geometry::BBox;
use crate::overlay::{Overlay, ACTION_COLOR, DIAGNOSTIC_COLOR, INTRUDER_COLOR, OBJECT_COLOR};

#[derive(Clone, Debug)]
pub struct AnalyzerSettings {
    /// Draw boxes and labels on the outgoing frame.
    pub draw: bool,
    /// Frames wider than this are downscaled first.
    pub max_width: u32,
    /// Raise `INTRUDER` for every person.
    pub intruder_alerts: bool,
    pub jpeg_quality: u8,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            draw: true,
            max_width: 1024,
            intruder_alerts: true,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// What happened on one frame.
#[derive(Clone, Debug, Default)]
pub struct FrameReport {
    pub seq: u64,
    pub persons: usize,
    pub objects: usize,
    pub actions: Vec<ActionEvent>,
    /// Alerts that passed throttling, in raise order.
    pub alerts: Vec<AlertEvent>,
    pub suppressed: usize,
    pub detection_error: Option<String>,
}

impl FrameReport {
    pub fn alerts_sent(&self) -> usize {
        self.alerts.len()
    }
}

pub struct FrameAnalyzer {
    detector: Box<dyn DetectorBackend>,
    recognizer: ActionRecognizer,
    notifier: Notifier,
    overlay: Arc<Overlay>,
    settings: AnalyzerSettings,
}

impl FrameAnalyzer {
    pub fn new(
        detector: Box<dyn DetectorBackend>,
        recognizer: ActionRecognizer,
        notifier: Notifier,
        overlay: Arc<Overlay>,
        settings: AnalyzerSettings,
    ) -> Self {
        Self {
            detector,
            recognizer,
            notifier,
            overlay,
            settings,
        }
    }

    pub fn detector_name(&self) -> &'static str {
        self.detector.name()
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn settings(&self) -> &AnalyzerSettings {
        &self.settings
    }

    /// Run the full per-frame algorithm and encode the annotated result once.
    ///
    /// Detection failures never fail the frame; only JPEG encoding can.
    pub fn process(&mut self, mut frame: Frame) -> Result<(EncodedFrame, FrameReport)> {
        frame.fit_width(self.settings.max_width);
        let mut report = FrameReport {
            seq: frame.seq,
            ..FrameReport::default()
        };

        // Luminance is taken before any overlay touches the pixels.
        let gray = frame.gray();

        let detections = match self.detector.detect(frame.image()) {
            Ok(detections) => detections,
            Err(e) => {
                let failure = SentryError::DetectionFailure(format!("{:#}", e));
                log::warn!("frame {}: {}", frame.seq, failure);
                report.detection_error = Some(format!("{:#}", e));
                Vec::new()
            }
        };
        if let Some(reason) = &report.detection_error {
            self.overlay.draw_text(
                frame.image_mut(),
                10,
                10,
                &format!("Detector error: {}", reason),
                DIAGNOSTIC_COLOR,
            );
        }

        let (persons, others) = partition_persons(&detections);
        report.persons = persons.len();
        report.objects = others.len();

        self.handle_persons(frame.image_mut(), &persons, &mut report);

        let actions = self.recognizer.infer(&gray, &persons);
        for action in &actions {
            let label = action.label.as_str();
            self.raise(label, frame.image(), &action.bbox, &mut report);
            if self.settings.draw {
                self.overlay
                    .draw_box(frame.image_mut(), &action.bbox, label, ACTION_COLOR);
            }
        }
        report.actions = actions;

        if self.settings.draw {
            for det in others {
                self.draw_object(frame.image_mut(), det);
            }
        }

        let encoded = frame.encode(self.settings.jpeg_quality)?;
        Ok((encoded, report))
    }

    /// Persons only alert and get boxed while intruder alerting is on.
    fn handle_persons(&mut self, image: &mut RgbImage, persons: &[BBox], report: &mut FrameReport) {
        if !self.settings.intruder_alerts {
            return;
        }
        for bbox in persons {
            self.raise(INTRUDER_LABEL, image, bbox, report);
            if self.settings.draw {
                self.overlay.draw_box(image, bbox, INTRUDER_LABEL, INTRUDER_COLOR);
            }
        }
    }

    fn raise(&mut self, label: &str, image: &RgbImage, bbox: &BBox, report: &mut FrameReport) {
        match self.notifier.notify(label, Some(image), Some(bbox)) {
            NotifyOutcome::Sent(event) => report.alerts.push(event),
            NotifyOutcome::Suppressed => report.suppressed += 1,
        }
    }

    fn draw_object(&self, image: &mut RgbImage, det: &Detection) {
        let text = format!("{} {:.2}", det.class, det.confidence);
        self.overlay.draw_box(image, &det.bbox, &text, OBJECT_COLOR);
    }
}
