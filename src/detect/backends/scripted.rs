use anyhow::{anyhow, Result};
use image::RgbImage;
use std::collections::VecDeque;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;

/// One scripted response.
#[derive(Clone, Debug)]
enum Step {
    Detections(Vec<Detection>),
    Failure(String),
}

/// Replays a fixed script of per-frame results.
///
/// Used for demos and tests where a deterministic detector is needed. Once
/// the script is exhausted the last step repeats; an empty script yields no
/// detections.
#[derive(Clone, Debug, Default)]
pub struct ScriptedBackend {
    steps: VecDeque<Step>,
    last: Option<Step>,
    calls: u64,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same detections for every frame.
    pub fn constant(detections: Vec<Detection>) -> Self {
        Self::new().then(detections)
    }

    /// Append a frame's detections to the script.
    pub fn then(mut self, detections: Vec<Detection>) -> Self {
        self.steps.push_back(Step::Detections(detections));
        self
    }

    /// Append a failing frame to the script.
    pub fn then_fail(mut self, reason: impl Into<String>) -> Self {
        self.steps.push_back(Step::Failure(reason.into()));
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<Detection>> {
        self.calls += 1;
        if let Some(step) = self.steps.pop_front() {
            self.last = Some(step);
        }
        match &self.last {
            Some(Step::Detections(dets)) => Ok(dets.clone()),
            Some(Step::Failure(reason)) => Err(anyhow!("{}", reason)),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BBox;

    #[test]
    fn replays_then_repeats_last() {
        let a = Detection::person(BBox::new(0.0, 0.0, 1.0, 1.0), 0.9);
        let mut backend = ScriptedBackend::new()
            .then(vec![])
            .then_fail("boom")
            .then(vec![a.clone()]);
        let frame = RgbImage::new(4, 4);
        assert!(backend.detect(&frame).unwrap().is_empty());
        assert!(backend.detect(&frame).is_err());
        assert_eq!(backend.detect(&frame).unwrap(), vec![a.clone()]);
        assert_eq!(backend.detect(&frame).unwrap(), vec![a]);
        assert_eq!(backend.calls(), 4);
    }
}
