use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Local, TimeZone};
use image::RgbImage;

use scene_sentry::alert::{ManualClock, NotificationChannel, Notifier, SnapshotStore};
use scene_sentry::{BBox, Overlay};

#[derive(Default)]
struct RecordingChannel {
    messages: Mutex<Vec<String>>,
}

impl RecordingChannel {
    fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn send(&self, message: &str) -> bool {
        self.messages.lock().unwrap().push(message.to_string());
        true
    }
}

fn notifier(dir: &Path, cooldown: Duration) -> (Notifier, ManualClock, Arc<RecordingChannel>) {
    let start = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 3).unwrap();
    let clock = ManualClock::new(start);
    let channel = Arc::new(RecordingChannel::default());
    let notifier = Notifier::with_clock(
        channel.clone(),
        cooldown,
        SnapshotStore::new(dir, 80),
        Arc::new(Overlay::new()),
        Box::new(clock.clone()),
    );
    (notifier, clock, channel)
}

fn snapshot_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .collect();
    names.sort();
    names
}

#[test]
fn cooldown_limits_snapshots_and_messages() {
    let tmp = tempfile::tempdir().unwrap();
    let (mut notifier, clock, channel) = notifier(tmp.path(), Duration::from_secs(60));
    let frame = RgbImage::new(64, 48);
    let bbox = BBox::new(4.0, 4.0, 30.0, 40.0);

    assert!(!notifier.notify("INTRUDER", Some(&frame), Some(&bbox)).is_suppressed());
    assert!(notifier.notify("INTRUDER", Some(&frame), Some(&bbox)).is_suppressed());
    assert_eq!(snapshot_names(tmp.path()), vec!["INTRUDER_20240309-070503.jpg"]);
    assert_eq!(channel.messages(), vec!["ALERT: INTRUDER detected."]);

    clock.advance(Duration::from_secs(61));
    let outcome = notifier.notify("INTRUDER", Some(&frame), Some(&bbox));
    assert_eq!(outcome.snapshot(), Some("INTRUDER_20240309-070604.jpg"));
    assert_eq!(snapshot_names(tmp.path()).len(), 2);
    assert_eq!(channel.messages().len(), 2);

    let stats = notifier.stats();
    assert_eq!(stats.sent, 2);
    assert_eq!(stats.suppressed, 1);
}

#[test]
fn slash_in_label_stays_inside_snapshot_dir() {
    let tmp = tempfile::tempdir().unwrap();
    let (mut notifier, _clock, channel) = notifier(tmp.path(), Duration::from_secs(60));
    let frame = RgbImage::new(32, 32);

    let outcome = notifier.notify("ACCIDENT/FALL", Some(&frame), None);
    assert_eq!(outcome.snapshot(), Some("ACCIDENT_FALL_20240309-070503.jpg"));

    let entries: Vec<_> = fs::read_dir(tmp.path()).unwrap().map(|e| e.unwrap()).collect();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].file_type().unwrap().is_file());
    // The unsanitised label is what goes out in the message.
    assert_eq!(channel.messages(), vec!["ALERT: ACCIDENT/FALL detected."]);
}

#[test]
fn alerts_without_a_frame_send_but_write_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let (mut notifier, _clock, channel) = notifier(tmp.path(), Duration::from_secs(60));

    let outcome = notifier.notify("VIOLENCE", None, None);
    assert!(!outcome.is_suppressed());
    assert_eq!(outcome.snapshot(), None);
    assert!(snapshot_names(tmp.path()).is_empty());
    assert_eq!(channel.messages().len(), 1);
}

#[test]
fn recent_events_lists_newest_first() {
    let tmp = tempfile::tempdir().unwrap();
    let (mut notifier, clock, _channel) = notifier(tmp.path(), Duration::from_secs(60));
    let frame = RgbImage::new(16, 16);

    notifier.notify("INTRUDER", Some(&frame), None);
    clock.advance(Duration::from_secs(5));
    // Keep file mtimes apart on coarse-timestamp filesystems.
    std::thread::sleep(Duration::from_millis(50));
    notifier.notify("ACCIDENT/FALL", Some(&frame), None);
    fs::write(tmp.path().join("notes.txt"), b"ignored").unwrap();

    let events = notifier.store().recent_events(12);
    let labels: Vec<&str> = events.iter().map(|e| e.label.as_str()).collect();
    assert_eq!(labels, vec!["ACCIDENT_FALL", "INTRUDER"]);
    assert_eq!(notifier.store().recent_events(1).len(), 1);

    let missing = SnapshotStore::new(tmp.path().join("missing"), 80);
    assert!(missing.recent_events(12).is_empty());
}
