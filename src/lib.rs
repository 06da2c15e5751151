//! Scene Sentry
//!
//! Live video analytics: detect people and objects frame by frame, recognise
//! falls and violent encounters with stateful heuristics, raise rate-limited
//! alerts with annotated snapshots, and re-stream the annotated video to any
//! number of viewers.
//!
//! # Architecture
//!
//! One producer thread owns the capture source and every piece of analytic
//! state. It runs the per-frame algorithm once, encodes the annotated frame
//! once, and publishes it to per-viewer bounded queues (drop-oldest). Viewers
//! never trigger analytics or alerts.
//!
//! # Module Structure
//!
//! - `frame`: decoded frames and shared encoded frames
//! - `geometry`: boxes and IoU
//! - `detect`: detector backends (learned, classical, null)
//! - `motion`: dense optical-flow magnitude
//! - `actions`: fall and violence rules
//! - `tracking`: optional IoU tracker for stable entity ids
//! - `alert`: throttled notifier, snapshots, notification channels
//! - `overlay`: box and label drawing
//! - `ingest`: capture sources
//! - `pipeline`: analyzer, producer thread and broadcaster
//! - `api`: HTTP surface
//! - `config`: file and environment configuration

pub mod actions;
pub mod alert;
pub mod api;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod motion;
pub mod overlay;
pub mod pipeline;
pub mod tracking;

use std::sync::Arc;

pub use actions::{ActionConfig, ActionEvent, ActionLabel, ActionRecognizer, EntityKeying};
pub use alert::{
    channel_from_config, AlertEvent, LogChannel, NotificationChannel, Notifier, NotifyOutcome,
    SnapshotStore,
};
pub use config::SentryConfig;
pub use detect::{build_detector, build_detector_with_fallback, Detection, DetectorBackend, DetectorKind};
pub use error::SentryError;
pub use frame::{EncodedFrame, Frame};
pub use geometry::{iou, BBox};
pub use ingest::{open_source, FrameSource, SourceConfig};
pub use motion::{MotionEstimator, MotionField};
pub use overlay::Overlay;
pub use pipeline::{
    mjpeg_part, AnalyzerSettings, Broadcaster, FrameAnalyzer, FrameReport, Pipeline,
    PipelineHandle, Subscription,
};

/// Assemble the analyzer described by `cfg` around an already-built detector
/// and notification channel.
pub fn build_analyzer(
    cfg: &SentryConfig,
    detector: Box<dyn DetectorBackend>,
    channel: Arc<dyn NotificationChannel>,
) -> FrameAnalyzer {
    let overlay = Arc::new(Overlay::load(cfg.video.font_path.as_deref()));
    let notifier = Notifier::new(
        channel,
        cfg.alerts.cooldown,
        SnapshotStore::new(cfg.alerts.snapshot_dir.clone(), cfg.video.jpeg_quality),
        overlay.clone(),
    );
    FrameAnalyzer::new(
        detector,
        ActionRecognizer::new(cfg.actions.clone()),
        notifier,
        overlay,
        cfg.analyzer_settings(),
    )
}
