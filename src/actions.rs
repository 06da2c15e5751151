//! Heuristic action recognition over person boxes and dense motion.
//!
//! Two rules run once per frame:
//! - **fall**: a person box wider than tall (aspect ratio at or above the
//!   threshold) for enough consecutive frames. Level-triggered: the label is
//!   re-emitted every frame while the condition holds.
//! - **violence**: two overlapping people whose shared region moves fast.
//!   Every qualifying pair emits independently.

use std::collections::HashMap;
use std::fmt;

use image::GrayImage;
use serde::Deserialize;

use crate::geometry::{iou, BBox};
use crate::motion::{MotionEstimator, MotionField};
use crate::tracking::IouTracker;

pub const FALL_LABEL: &str = "ACCIDENT/FALL";
pub const VIOLENCE_LABEL: &str = "VIOLENCE";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActionLabel {
    Fall,
    Violence,
}

impl ActionLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fall => FALL_LABEL,
            Self::Violence => VIOLENCE_LABEL,
        }
    }
}

impl fmt::Display for ActionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recognised action and the box it applies to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ActionEvent {
    pub label: ActionLabel,
    pub bbox: BBox,
}

#[derive(Clone, Debug)]
pub struct FallRule {
    pub enabled: bool,
    pub aspect_ratio_threshold: f32,
    pub min_consecutive_frames: u32,
}

impl Default for FallRule {
    fn default() -> Self {
        Self {
            enabled: true,
            aspect_ratio_threshold: 1.2,
            min_consecutive_frames: 8,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ViolenceRule {
    pub enabled: bool,
    pub proximity_iou_threshold: f32,
    pub motion_magnitude_threshold: f32,
}

impl Default for ViolenceRule {
    fn default() -> Self {
        Self {
            enabled: true,
            proximity_iou_threshold: 0.2,
            motion_magnitude_threshold: 2.5,
        }
    }
}

/// How per-person counters are keyed between frames.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase", tag = "mode")]
pub enum EntityKeying {
    /// Position of the box in this frame's detection list.
    Positional,
    /// Stable ids from greedy IoU association across frames.
    Tracked {
        min_iou: f32,
        max_missed_frames: u32,
    },
}

impl Default for EntityKeying {
    fn default() -> Self {
        Self::Positional
    }
}

#[derive(Clone, Debug, Default)]
pub struct ActionConfig {
    pub fall: FallRule,
    pub violence: ViolenceRule,
    pub keying: EntityKeying,
}

/// Stateful recogniser. Owned by a single producer; not shared.
pub struct ActionRecognizer {
    cfg: ActionConfig,
    motion: MotionEstimator,
    fall_counters: HashMap<u64, u32>,
    tracker: Option<IouTracker>,
}

impl ActionRecognizer {
    pub fn new(cfg: ActionConfig) -> Self {
        Self::with_motion(cfg, MotionEstimator::default())
    }

    pub fn with_motion(cfg: ActionConfig, motion: MotionEstimator) -> Self {
        let tracker = match cfg.keying {
            EntityKeying::Positional => None,
            EntityKeying::Tracked {
                min_iou,
                max_missed_frames,
            } => Some(IouTracker::new(min_iou, max_missed_frames)),
        };
        Self {
            cfg,
            motion,
            fall_counters: HashMap::new(),
            tracker,
        }
    }

    pub fn config(&self) -> &ActionConfig {
        &self.cfg
    }

    /// Consecutive-frame count for an entity key.
    pub fn fall_count(&self, key: u64) -> u32 {
        self.fall_counters.get(&key).copied().unwrap_or(0)
    }

    /// Number of live counter entries.
    pub fn tracked_entities(&self) -> usize {
        self.fall_counters.len()
    }

    /// Update motion from `gray` and evaluate both rules for this frame.
    pub fn infer(&mut self, gray: &GrayImage, persons: &[BBox]) -> Vec<ActionEvent> {
        let motion = self.motion.update(gray);
        self.infer_with_motion(&motion, persons)
    }

    /// Evaluate both rules against an externally computed motion field.
    ///
    /// Output order: falls by input index, then violence by pair `(i, j)`
    /// with `i < j` ascending.
    pub fn infer_with_motion(&mut self, motion: &MotionField, persons: &[BBox]) -> Vec<ActionEvent> {
        let mut events = Vec::new();
        let keys = self.entity_keys(persons);

        if self.cfg.fall.enabled {
            self.apply_fall_rule(persons, &keys, &mut events);
        }
        self.prune_counters(&keys);

        if self.cfg.violence.enabled && persons.len() >= 2 {
            self.apply_violence_rule(motion, persons, &mut events);
        }
        events
    }

    fn entity_keys(&mut self, persons: &[BBox]) -> Vec<u64> {
        match self.tracker.as_mut() {
            Some(tracker) => tracker.assign(persons),
            None => (0..persons.len() as u64).collect(),
        }
    }

    fn apply_fall_rule(&mut self, persons: &[BBox], keys: &[u64], events: &mut Vec<ActionEvent>) {
        let rule = &self.cfg.fall;
        for (bbox, key) in persons.iter().zip(keys) {
            let w = bbox.width();
            let h = bbox.height();
            let lying = h > 0.0 && w / h >= rule.aspect_ratio_threshold;
            let counter = self.fall_counters.entry(*key).or_insert(0);
            if lying {
                *counter = counter.saturating_add(1);
            } else {
                *counter = 0;
            }
            if *counter >= rule.min_consecutive_frames {
                events.push(ActionEvent {
                    label: ActionLabel::Fall,
                    bbox: *bbox,
                });
            }
        }
    }

    /// Keep counters only for entities that can still be observed.
    fn prune_counters(&mut self, keys: &[u64]) {
        match self.tracker.as_ref() {
            Some(tracker) => self.fall_counters.retain(|id, _| tracker.is_live(*id)),
            None => {
                let live = keys.len() as u64;
                self.fall_counters.retain(|index, _| *index < live);
            }
        }
    }

    fn apply_violence_rule(
        &self,
        motion: &MotionField,
        persons: &[BBox],
        events: &mut Vec<ActionEvent>,
    ) {
        let rule = &self.cfg.violence;
        for i in 0..persons.len() {
            for j in i + 1..persons.len() {
                let (a, b) = (&persons[i], &persons[j]);
                if iou(a, b) < rule.proximity_iou_threshold {
                    continue;
                }
                let Some(overlap) = a.intersection(b) else {
                    continue;
                };
                let Some(mean) = motion.mean_in(&overlap) else {
                    continue;
                };
                if mean >= rule.motion_magnitude_threshold {
                    events.push(ActionEvent {
                        label: ActionLabel::Violence,
                        bbox: a.union(b),
                    });
                }
            }
        }
    }
}
