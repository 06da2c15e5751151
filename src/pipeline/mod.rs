//! Producer/broadcast split.
//!
//! One producer thread owns the capture source and the `FrameAnalyzer`, runs
//! the analytics once per captured frame and publishes the encoded result.
//! Viewers only ever see `EncodedFrame`s through their own `Subscription`.

mod analyzer;
mod broadcast;

pub use analyzer::{AnalyzerSettings, FrameAnalyzer, FrameReport};
pub use broadcast::{BroadcastStats, Broadcaster, Subscription};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use crate::error::SentryError;
use crate::frame::EncodedFrame;
use crate::ingest::FrameSource;

/// Multipart boundary used by the video stream.
pub const MJPEG_BOUNDARY: &str = "frame";
pub const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// One multipart part: `--frame`, the JPEG content type, a blank line, the
/// payload, then CRLF.
pub fn mjpeg_part(frame: &EncodedFrame) -> Vec<u8> {
    const HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
    let mut part = Vec::with_capacity(HEADER.len() + frame.len() + 2);
    part.extend_from_slice(HEADER);
    part.extend_from_slice(&frame.jpeg);
    part.extend_from_slice(b"\r\n");
    part
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Per-viewer queue capacity.
    pub queue_depth: usize,
    /// Wait after a failed capture read before retrying.
    pub retry_delay: Duration,
    pub health_log_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_depth: 2,
            retry_delay: Duration::from_millis(20),
            health_log_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Default)]
struct Counters {
    frames_captured: AtomicU64,
    frames_broadcast: AtomicU64,
    read_failures: AtomicU64,
    detection_failures: AtomicU64,
    encode_failures: AtomicU64,
    alerts_sent: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_captured: u64,
    pub frames_broadcast: u64,
    pub read_failures: u64,
    pub detection_failures: u64,
    pub encode_failures: u64,
    pub alerts_sent: u64,
    pub subscribers: usize,
}

pub struct Pipeline;

impl Pipeline {
    /// Start the producer thread. The source must already be connected.
    pub fn spawn<S>(source: S, analyzer: FrameAnalyzer, cfg: PipelineConfig) -> Result<PipelineHandle>
    where
        S: FrameSource + 'static,
    {
        let broadcaster = Broadcaster::new(cfg.queue_depth);
        let shutdown = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());

        let producer = Producer {
            source,
            analyzer,
            cfg,
            broadcaster: broadcaster.clone(),
            shutdown: shutdown.clone(),
            counters: counters.clone(),
        };
        let join = std::thread::Builder::new()
            .name("sentry-producer".to_string())
            .spawn(move || producer.run())
            .context("spawn producer thread")?;

        Ok(PipelineHandle {
            broadcaster,
            shutdown,
            counters,
            join: Some(join),
        })
    }
}

struct Producer<S> {
    source: S,
    analyzer: FrameAnalyzer,
    cfg: PipelineConfig,
    broadcaster: Broadcaster,
    shutdown: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl<S: FrameSource> Producer<S> {
    fn run(mut self) {
        log::info!(
            "producer started (detector={}, queue_depth={})",
            self.analyzer.detector_name(),
            self.cfg.queue_depth
        );
        let mut last_health_log = Instant::now();
        while !self.shutdown.load(Ordering::SeqCst) {
            self.step();
            if last_health_log.elapsed() >= self.cfg.health_log_interval {
                self.log_health();
                last_health_log = Instant::now();
            }
        }
        let source_name = self.source.stats().source;
        drop(self.source);
        self.broadcaster.close();
        log::info!("producer stopped; released {}", source_name);
    }

    fn step(&mut self) {
        let frame = match self.source.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                self.counters.read_failures.fetch_add(1, Ordering::Relaxed);
                log::debug!("{}", SentryError::TransientReadFailure(format!("{:#}", e)));
                std::thread::sleep(self.cfg.retry_delay);
                return;
            }
        };
        self.counters.frames_captured.fetch_add(1, Ordering::Relaxed);

        match self.analyzer.process(frame) {
            Ok((encoded, report)) => {
                if report.detection_error.is_some() {
                    self.counters.detection_failures.fetch_add(1, Ordering::Relaxed);
                }
                self.counters
                    .alerts_sent
                    .fetch_add(report.alerts_sent() as u64, Ordering::Relaxed);
                self.broadcaster.publish(&encoded);
                self.counters.frames_broadcast.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.counters.encode_failures.fetch_add(1, Ordering::Relaxed);
                log::warn!("frame dropped: {:#}", e);
            }
        }
    }

    fn log_health(&self) {
        let stats = snapshot(&self.counters, &self.broadcaster);
        log::info!(
            "health: source={} healthy={} captured={} broadcast={} subscribers={} read_failures={} detection_failures={} alerts={}",
            self.source.stats().source,
            self.source.is_healthy(),
            stats.frames_captured,
            stats.frames_broadcast,
            stats.subscribers,
            stats.read_failures,
            stats.detection_failures,
            stats.alerts_sent
        );
    }
}

fn snapshot(counters: &Counters, broadcaster: &Broadcaster) -> PipelineStats {
    PipelineStats {
        frames_captured: counters.frames_captured.load(Ordering::Relaxed),
        frames_broadcast: counters.frames_broadcast.load(Ordering::Relaxed),
        read_failures: counters.read_failures.load(Ordering::Relaxed),
        detection_failures: counters.detection_failures.load(Ordering::Relaxed),
        encode_failures: counters.encode_failures.load(Ordering::Relaxed),
        alerts_sent: counters.alerts_sent.load(Ordering::Relaxed),
        subscribers: broadcaster.subscriber_count(),
    }
}

/// Controls a running pipeline. Dropping the handle stops the pipeline.
pub struct PipelineHandle {
    broadcaster: Broadcaster,
    shutdown: Arc<AtomicBool>,
    counters: Arc<Counters>,
    join: Option<JoinHandle<()>>,
}

impl PipelineHandle {
    pub fn subscribe(&self) -> Subscription {
        self.broadcaster.subscribe()
    }

    /// Shared handle for serving viewers from other threads.
    pub fn broadcaster(&self) -> Broadcaster {
        self.broadcaster.clone()
    }

    pub fn stats(&self) -> PipelineStats {
        snapshot(&self.counters, &self.broadcaster)
    }

    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|join| !join.is_finished())
    }

    /// Stop the producer, release the source and close every viewer queue.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown_inner()
    }

    fn shutdown_inner(&mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        // Viewers end now; the producer may still be blocked in a read.
        self.broadcaster.close();
        match self.join.take() {
            Some(join) => join
                .join()
                .map_err(|_| anyhow!("producer thread panicked")),
            None => Ok(()),
        }
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown_inner() {
            log::error!("pipeline shutdown: {}", e);
        }
    }
}
