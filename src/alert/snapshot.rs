//! On-disk snapshot evidence and the recent-events listing.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use image::RgbImage;
use serde::Serialize;

use crate::frame::encode_jpeg;
use crate::geometry::BBox;

const SNAPSHOT_EXT: &str = "jpg";
const FILENAME_TIME_FORMAT: &str = "%Y%m%d-%H%M%S";
const DISPLAY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One alert, either just raised or read back from the snapshot directory.
#[derive(Clone, Debug, Serialize)]
pub struct AlertEvent {
    pub label: String,
    pub timestamp: DateTime<Local>,
    /// Snapshot filename relative to the snapshot directory.
    pub snapshot: Option<String>,
    #[serde(rename = "box")]
    pub bbox: Option<BBox>,
}

impl AlertEvent {
    pub fn display_time(&self) -> String {
        self.timestamp.format(DISPLAY_TIME_FORMAT).to_string()
    }
}

/// Replace path separators so a label can never escape the snapshot directory.
pub fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c => c,
        })
        .collect()
}

/// `<sanitized-label>_<YYYYMMDD-HHMMSS>.jpg`
pub fn snapshot_filename(label: &str, at: &DateTime<Local>) -> String {
    format!(
        "{}_{}.{}",
        sanitize_label(label),
        at.format(FILENAME_TIME_FORMAT),
        SNAPSHOT_EXT
    )
}

/// Label portion of a snapshot filename: everything before the trailing
/// `_<timestamp>.jpg`.
fn label_from_filename(name: &str) -> String {
    let stem = name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(name);
    match stem.rsplit_once('_') {
        Some((label, _)) if !label.is_empty() => label.to_string(),
        _ => stem.to_string(),
    }
}

/// Flat directory of JPEG snapshots.
#[derive(Clone, Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
    quality: u8,
}

impl SnapshotStore {
    pub fn new<P: Into<PathBuf>>(dir: P, quality: u8) -> Self {
        Self {
            dir: dir.into(),
            quality,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the directory if absent. Idempotent.
    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create snapshot dir {}", self.dir.display()))
    }

    /// Encode and persist `image` under `filename`.
    pub fn save(&self, filename: &str, image: &RgbImage) -> Result<PathBuf> {
        self.ensure_dir()?;
        let path = self.dir.join(filename);
        let jpeg = encode_jpeg(image, self.quality)?;
        fs::write(&path, jpeg).with_context(|| format!("write snapshot {}", path.display()))?;
        Ok(path)
    }

    /// Resolve a listed snapshot name to its path. Names that are not a single
    /// plain `.jpg` file component are rejected.
    pub fn resolve(&self, filename: &str) -> Option<PathBuf> {
        let plain = !filename.is_empty()
            && !filename.starts_with('.')
            && !filename.contains(['/', '\\'])
            && is_snapshot_name(filename);
        if !plain {
            return None;
        }
        let path = self.dir.join(filename);
        path.is_file().then_some(path)
    }

    /// Most recent snapshots first, at most `limit`. A missing or unreadable
    /// directory lists as empty.
    pub fn recent_events(&self, limit: usize) -> Vec<AlertEvent> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::debug!("snapshot dir {} not readable: {}", self.dir.display(), e);
                return Vec::new();
            }
        };
        let mut found: Vec<(SystemTime, String)> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                if !is_snapshot_name(&name) {
                    return None;
                }
                let meta = entry.metadata().ok()?;
                if !meta.is_file() {
                    return None;
                }
                Some((meta.modified().ok()?, name))
            })
            .collect();
        found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
        found
            .into_iter()
            .take(limit)
            .map(|(modified, name)| AlertEvent {
                label: label_from_filename(&name),
                timestamp: DateTime::<Local>::from(modified),
                snapshot: Some(name),
                bbox: None,
            })
            .collect()
    }
}

fn is_snapshot_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(SNAPSHOT_EXT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 3, 9, h, m, s)
            .single()
            .expect("unambiguous local time")
    }

    #[test]
    fn filename_format() {
        assert_eq!(
            snapshot_filename("INTRUDER", &at(7, 5, 3)),
            "INTRUDER_20240309-070503.jpg"
        );
        assert_eq!(
            snapshot_filename("ACCIDENT/FALL", &at(23, 59, 59)),
            "ACCIDENT_FALL_20240309-235959.jpg"
        );
    }

    #[test]
    fn label_round_trips_through_filename() {
        assert_eq!(label_from_filename("ACCIDENT_FALL_20240309-235959.jpg"), "ACCIDENT_FALL");
        assert_eq!(label_from_filename("VIOLENCE_20240309-235959.jpg"), "VIOLENCE");
        assert_eq!(label_from_filename("odd.jpg"), "odd");
    }

    #[test]
    fn save_creates_dir_and_lists() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path().join("nested/events"), 80);
        assert!(store.recent_events(12).is_empty());
        let img = RgbImage::new(8, 8);
        store.save("INTRUDER_20240309-070503.jpg", &img).unwrap();
        store.ensure_dir().unwrap();
        fs::write(store.dir().join("notes.txt"), b"x").unwrap();

        let events = store.recent_events(12);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].label, "INTRUDER");
        assert_eq!(events[0].snapshot.as_deref(), Some("INTRUDER_20240309-070503.jpg"));
    }

    #[test]
    fn listing_respects_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path(), 80);
        let img = RgbImage::new(4, 4);
        for i in 0..5 {
            store.save(&format!("L{}_20240309-07050{}.jpg", i, i), &img).unwrap();
        }
        assert_eq!(store.recent_events(3).len(), 3);
    }

    #[test]
    fn resolve_rejects_traversal() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path(), 80);
        store.save("A_20240309-070503.jpg", &RgbImage::new(4, 4)).unwrap();
        assert!(store.resolve("A_20240309-070503.jpg").is_some());
        assert!(store.resolve("../A_20240309-070503.jpg").is_none());
        assert!(store.resolve("..").is_none());
        assert!(store.resolve("missing.jpg").is_none());
        assert!(store.resolve("A.txt").is_none());
    }
}
