//! Frame ingestion sources.
//!
//! Every source produces decoded `Frame`s with strictly increasing sequence
//! numbers:
//! - `stub://…`: synthetic moving texture (tests, demos)
//! - a directory: JPEG/PNG image sequence, looped
//! - `http(s)://…`: MJPEG or single-JPEG over HTTP (feature: ingest-http)
//! - a device index (`0`) or `/dev/video*`: V4L2 capture (feature: ingest-v4l2)
//!
//! The source is chosen once at composition time by `open_source`.

#[cfg(feature = "ingest-http")]
pub mod mjpeg;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod sequence;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use std::path::Path;
use std::time::Duration;

use anyhow::Result;

use crate::error::SentryError;
use crate::frame::Frame;

#[cfg(feature = "ingest-http")]
pub use mjpeg::MjpegSource;
pub use sequence::ImageSequenceSource;
pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// A capture resource owned by the pipeline producer.
///
/// Dropping the source releases the underlying device or connection.
pub trait FrameSource: Send {
    /// Open the device or connection. Called once before the first read.
    fn connect(&mut self) -> Result<()>;

    /// Block until the next frame is available.
    ///
    /// Errors are per-frame; the caller waits briefly and retries.
    fn next_frame(&mut self) -> Result<Frame>;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn next_frame(&mut self) -> Result<Frame> {
        (**self).next_frame()
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }

    fn stats(&self) -> SourceStats {
        (**self).stats()
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// Configuration for opening a source.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    pub url: String,
    /// Target frame rate (frames per second). 0 means as fast as possible.
    pub target_fps: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: "0".to_string(),
            target_fps: 15,
        }
    }
}

/// Select, construct and connect the source named by `cfg.url`.
///
/// Every failure is reported as `SentryError::CaptureUnavailable`.
pub fn open_source(cfg: &SourceConfig) -> Result<Box<dyn FrameSource>> {
    let url = cfg.url.trim();
    let mut source = build_source(url, cfg.target_fps)
        .map_err(|e| SentryError::capture_unavailable(url, format!("{:#}", e)))?;
    source
        .connect()
        .map_err(|e| SentryError::capture_unavailable(url, format!("{:#}", e)))?;
    Ok(source)
}

fn build_source(url: &str, target_fps: u32) -> Result<Box<dyn FrameSource>> {
    if url.is_empty() {
        return Err(anyhow::anyhow!("empty source url"));
    }
    if url.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(url, target_fps)));
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        return build_http(url, target_fps);
    }
    if is_device(url) {
        return build_device(url, target_fps);
    }
    if Path::new(url).is_dir() {
        return Ok(Box::new(ImageSequenceSource::from_dir(url, target_fps)?));
    }
    Err(anyhow::anyhow!(
        "unrecognised source; expected stub://, http(s)://, a device index, /dev/video* or a directory"
    ))
}

fn is_device(url: &str) -> bool {
    url.chars().all(|c| c.is_ascii_digit()) || url.starts_with("/dev/video")
}

#[cfg(feature = "ingest-http")]
fn build_http(url: &str, target_fps: u32) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(MjpegSource::new(url, target_fps)?))
}

#[cfg(not(feature = "ingest-http"))]
fn build_http(_url: &str, _target_fps: u32) -> Result<Box<dyn FrameSource>> {
    Err(anyhow::anyhow!("http sources require the ingest-http feature"))
}

#[cfg(feature = "ingest-v4l2")]
fn build_device(url: &str, target_fps: u32) -> Result<Box<dyn FrameSource>> {
    let device = if url.chars().all(|c| c.is_ascii_digit()) {
        format!("/dev/video{}", url)
    } else {
        url.to_string()
    };
    Ok(Box::new(V4l2Source::new(v4l2::V4l2Config {
        device,
        target_fps,
        ..v4l2::V4l2Config::default()
    })))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn build_device(_url: &str, _target_fps: u32) -> Result<Box<dyn FrameSource>> {
    Err(anyhow::anyhow!("capture devices require the ingest-v4l2 feature"))
}

pub(crate) fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}

#[cfg_attr(
    not(any(feature = "ingest-http", feature = "ingest-v4l2")),
    allow(dead_code)
)]
pub(crate) fn health_grace(target_fps: u32) -> Duration {
    let base_ms = if target_fps == 0 {
        2_000
    } else {
        (1000 / target_fps).saturating_mul(6)
    };
    Duration::from_millis(base_ms.max(2_000) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(url: &str) -> SourceConfig {
        SourceConfig {
            url: url.to_string(),
            target_fps: 0,
        }
    }

    #[test]
    fn stub_source_opens() -> Result<()> {
        let mut source = open_source(&cfg("stub://front"))?;
        let frame = source.next_frame()?;
        assert!(frame.width() > 0);
        assert!(source.is_healthy());
        Ok(())
    }

    #[test]
    fn unknown_source_is_capture_unavailable() {
        let err = open_source(&cfg("/nonexistent/path/to/nothing"))
            .err()
            .expect("must fail");
        assert!(matches!(
            err.downcast_ref::<SentryError>(),
            Some(SentryError::CaptureUnavailable { .. })
        ));
    }

    #[test]
    fn empty_directory_is_capture_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let err = open_source(&cfg(tmp.path().to_str().unwrap()))
            .err()
            .expect("must fail");
        assert!(err.downcast_ref::<SentryError>().is_some_and(|e| e.is_fatal()));
    }

    #[test]
    fn device_urls() {
        assert!(is_device("0"));
        assert!(is_device("/dev/video2"));
        assert!(!is_device("stub://x"));
    }

    #[test]
    fn interval_from_fps() {
        assert_eq!(frame_interval(0), Duration::ZERO);
        assert_eq!(frame_interval(10), Duration::from_millis(100));
        assert_eq!(health_grace(10), Duration::from_millis(2_000));
        assert_eq!(health_grace(1), Duration::from_millis(6_000));
    }
}
