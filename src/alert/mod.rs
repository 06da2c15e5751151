//! Alerting: per-label throttling, snapshot evidence and outbound channels.

mod channel;
mod notifier;
mod snapshot;

#[cfg(feature = "notify-twilio")]
pub use channel::TwilioChannel;
pub use channel::{channel_from_config, LogChannel, NotificationChannel, TwilioCredentials};
pub use notifier::{Clock, ManualClock, Notifier, NotifierStats, NotifyOutcome, SystemClock};
pub use snapshot::{sanitize_label, snapshot_filename, AlertEvent, SnapshotStore};

/// Label raised for every person while intruder alerting is enabled.
pub const INTRUDER_LABEL: &str = "INTRUDER";
