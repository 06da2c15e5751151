//! Per-label alert throttling with snapshot evidence.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Local};
use image::RgbImage;

use super::channel::NotificationChannel;
use super::snapshot::{snapshot_filename, AlertEvent, SnapshotStore};
use crate::geometry::BBox;
use crate::overlay::{Overlay, ACTION_COLOR};

/// Wall-clock source for cooldowns and snapshot names.
pub trait Clock: Send {
    fn now(&self) -> DateTime<Local>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Settable clock. Clones share the same instant.
#[derive(Clone, Debug)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Local>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Local>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        if let Ok(delta) = chrono::Duration::from_std(by) {
            *now += delta;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone, Debug)]
pub enum NotifyOutcome {
    /// Within the label's cooldown; nothing was written or sent.
    Suppressed,
    Sent(AlertEvent),
}

impl NotifyOutcome {
    pub fn is_suppressed(&self) -> bool {
        matches!(self, Self::Suppressed)
    }

    pub fn snapshot(&self) -> Option<&str> {
        match self {
            Self::Sent(event) => event.snapshot.as_deref(),
            Self::Suppressed => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NotifierStats {
    pub sent: u64,
    pub suppressed: u64,
    pub delivery_failures: u64,
    pub snapshot_failures: u64,
}

/// Owns the cooldown state for one pipeline. Not shared across producers.
pub struct Notifier {
    channel: Arc<dyn NotificationChannel>,
    cooldown: Duration,
    store: SnapshotStore,
    overlay: Arc<Overlay>,
    clock: Box<dyn Clock>,
    last_notified: HashMap<String, DateTime<Local>>,
    stats: NotifierStats,
}

impl Notifier {
    pub fn new(
        channel: Arc<dyn NotificationChannel>,
        cooldown: Duration,
        store: SnapshotStore,
        overlay: Arc<Overlay>,
    ) -> Self {
        Self::with_clock(channel, cooldown, store, overlay, Box::new(SystemClock))
    }

    pub fn with_clock(
        channel: Arc<dyn NotificationChannel>,
        cooldown: Duration,
        store: SnapshotStore,
        overlay: Arc<Overlay>,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            channel,
            cooldown,
            store,
            overlay,
            clock,
            last_notified: HashMap::new(),
            stats: NotifierStats::default(),
        }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn stats(&self) -> NotifierStats {
        self.stats
    }

    /// Raise `label` unless it fired within the cooldown.
    ///
    /// The caller's frame is never modified; the snapshot is drawn on a copy.
    /// Snapshot and delivery failures are logged, not returned.
    pub fn notify(&mut self, label: &str, frame: Option<&RgbImage>, bbox: Option<&BBox>) -> NotifyOutcome {
        let now = self.clock.now();
        if self.in_cooldown(label, &now) {
            self.stats.suppressed += 1;
            return NotifyOutcome::Suppressed;
        }
        self.last_notified.insert(label.to_string(), now);

        let snapshot = frame.and_then(|frame| self.write_snapshot(label, frame, bbox, &now));

        let message = format!("ALERT: {} detected.", label);
        if !self.channel.send(&message) {
            self.stats.delivery_failures += 1;
            log::warn!("alert '{}' not delivered via {}", label, self.channel.name());
        }
        self.stats.sent += 1;

        NotifyOutcome::Sent(AlertEvent {
            label: label.to_string(),
            timestamp: now,
            snapshot,
            bbox: bbox.copied(),
        })
    }

    fn in_cooldown(&self, label: &str, now: &DateTime<Local>) -> bool {
        let Some(last) = self.last_notified.get(label) else {
            return false;
        };
        // A clock stepping backwards counts as no time elapsed.
        let elapsed = now.signed_duration_since(*last).to_std().unwrap_or(Duration::ZERO);
        elapsed < self.cooldown
    }

    fn write_snapshot(
        &mut self,
        label: &str,
        frame: &RgbImage,
        bbox: Option<&BBox>,
        now: &DateTime<Local>,
    ) -> Option<String> {
        let mut annotated = frame.clone();
        if let Some(bbox) = bbox {
            self.overlay.draw_box(&mut annotated, bbox, label, ACTION_COLOR);
        }
        let filename = snapshot_filename(label, now);
        match self.store.save(&filename, &annotated) {
            Ok(path) => {
                log::info!("alert '{}' snapshot {}", label, path.display());
                Some(filename)
            }
            Err(e) => {
                self.stats.snapshot_failures += 1;
                log::error!("alert '{}' snapshot failed: {:#}", label, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingChannel {
        sent: AtomicUsize,
        fail: bool,
    }

    impl NotificationChannel for CountingChannel {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn send(&self, _message: &str) -> bool {
            self.sent.fetch_add(1, Ordering::SeqCst);
            !self.fail
        }
    }

    fn notifier(dir: &std::path::Path, cooldown: u64, channel: Arc<CountingChannel>) -> (Notifier, ManualClock) {
        let clock = ManualClock::new(Local::now());
        let n = Notifier::with_clock(
            channel,
            Duration::from_secs(cooldown),
            SnapshotStore::new(dir, 80),
            Arc::new(Overlay::new()),
            Box::new(clock.clone()),
        );
        (n, clock)
    }

    #[test]
    fn labels_throttle_independently() {
        let tmp = tempfile::tempdir().unwrap();
        let channel = Arc::new(CountingChannel::default());
        let (mut n, _clock) = notifier(tmp.path(), 60, channel.clone());
        assert!(!n.notify("INTRUDER", None, None).is_suppressed());
        assert!(n.notify("INTRUDER", None, None).is_suppressed());
        assert!(!n.notify("VIOLENCE", None, None).is_suppressed());
        assert_eq!(channel.sent.load(Ordering::SeqCst), 2);
        assert_eq!(n.stats().suppressed, 1);
    }

    #[test]
    fn zero_cooldown_never_suppresses() {
        let tmp = tempfile::tempdir().unwrap();
        let channel = Arc::new(CountingChannel::default());
        let (mut n, _clock) = notifier(tmp.path(), 0, channel.clone());
        for _ in 0..3 {
            assert!(!n.notify("INTRUDER", None, None).is_suppressed());
        }
        assert_eq!(channel.sent.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn caller_frame_is_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let channel = Arc::new(CountingChannel::default());
        let (mut n, _clock) = notifier(tmp.path(), 60, channel);
        let frame = RgbImage::new(32, 32);
        let outcome = n.notify("INTRUDER", Some(&frame), Some(&BBox::new(2.0, 20.0, 30.0, 30.0)));
        assert!(outcome.snapshot().is_some());
        assert!(frame.pixels().all(|p| p.0 == [0, 0, 0]));
    }

    #[test]
    fn delivery_failure_is_absorbed() {
        let tmp = tempfile::tempdir().unwrap();
        let channel = Arc::new(CountingChannel {
            fail: true,
            ..CountingChannel::default()
        });
        let (mut n, _clock) = notifier(tmp.path(), 60, channel);
        assert!(!n.notify("VIOLENCE", None, None).is_suppressed());
        assert_eq!(n.stats().delivery_failures, 1);
    }

    #[test]
    fn unwritable_snapshot_still_sends() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let channel = Arc::new(CountingChannel::default());
        let (mut n, _clock) = notifier(&blocker, 60, channel.clone());
        let outcome = n.notify("INTRUDER", Some(&RgbImage::new(8, 8)), None);
        assert!(!outcome.is_suppressed());
        assert_eq!(outcome.snapshot(), None);
        assert_eq!(channel.sent.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cooldown_expires() {
        let tmp = tempfile::tempdir().unwrap();
        let channel = Arc::new(CountingChannel::default());
        let (mut n, clock) = notifier(tmp.path(), 60, channel);
        assert!(!n.notify("INTRUDER", None, None).is_suppressed());
        clock.advance(Duration::from_secs(59));
        assert!(n.notify("INTRUDER", None, None).is_suppressed());
        clock.advance(Duration::from_secs(1));
        assert!(!n.notify("INTRUDER", None, None).is_suppressed());
    }
}
