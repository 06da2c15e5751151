//! Lightweight greedy IoU tracker giving people stable ids across frames.

use crate::geometry::{iou, BBox};

#[derive(Clone, Debug)]
struct Track {
    id: u64,
    bbox: BBox,
    missed: u32,
}

/// Greedy IoU association. Best-overlapping (track, box) pairs are matched
/// first; unmatched boxes open new tracks; tracks unseen for more than
/// `max_missed_frames` frames are dropped.
#[derive(Clone, Debug)]
pub struct IouTracker {
    min_iou: f32,
    max_missed_frames: u32,
    tracks: Vec<Track>,
    next_id: u64,
}

impl IouTracker {
    pub fn new(min_iou: f32, max_missed_frames: u32) -> Self {
        Self {
            min_iou,
            max_missed_frames,
            tracks: Vec::new(),
            next_id: 0,
        }
    }

    /// Assign an id to every box, in input order.
    pub fn assign(&mut self, boxes: &[BBox]) -> Vec<u64> {
        let mut candidates: Vec<(f32, usize, usize)> = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            for (bi, bbox) in boxes.iter().enumerate() {
                let overlap = iou(&track.bbox, bbox);
                if overlap >= self.min_iou && overlap > 0.0 {
                    candidates.push((overlap, ti, bi));
                }
            }
        }
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut track_taken = vec![false; self.tracks.len()];
        let mut ids: Vec<Option<u64>> = vec![None; boxes.len()];
        for (_, ti, bi) in candidates {
            if track_taken[ti] || ids[bi].is_some() {
                continue;
            }
            track_taken[ti] = true;
            ids[bi] = Some(self.tracks[ti].id);
            self.tracks[ti].bbox = boxes[bi];
            self.tracks[ti].missed = 0;
        }

        for (ti, taken) in track_taken.iter().enumerate() {
            if !taken {
                self.tracks[ti].missed += 1;
            }
        }
        let max_missed = self.max_missed_frames;
        self.tracks.retain(|t| t.missed <= max_missed);

        ids.iter()
            .zip(boxes)
            .map(|(id, bbox)| match id {
                Some(id) => *id,
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    self.tracks.push(Track {
                        id,
                        bbox: *bbox,
                        missed: 0,
                    });
                    id
                }
            })
            .collect()
    }

    pub fn is_live(&self, id: u64) -> bool {
        self.tracks.iter().any(|t| t.id == id)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}
