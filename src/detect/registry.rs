use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::Deserialize;

use super::backend::DetectorBackend;
use super::backends::{HogBackend, HogParams, NullBackend};

/// Closed set of detector variants selectable from configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    /// Multi-class neural detector (ONNX via tract).
    #[serde(alias = "yolo")]
    Learned,
    /// HOG + linear SVM person detector.
    #[serde(alias = "hog", alias = "mock")]
    Classical,
    /// Detects nothing.
    #[serde(alias = "null")]
    None,
}

impl DetectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Learned => "learned",
            Self::Classical => "classical",
            Self::None => "none",
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "learned" | "yolo" => Ok(Self::Learned),
            "classical" | "hog" | "mock" => Ok(Self::Classical),
            "none" | "null" => Ok(Self::None),
            other => Err(anyhow!(
                "unknown detector '{}'; expected learned, classical or none",
                other
            )),
        }
    }
}

/// Settings for every detector variant.
#[derive(Clone, Debug)]
pub struct DetectorConfig {
    pub kind: DetectorKind,
    pub model_path: PathBuf,
    pub labels_path: Option<PathBuf>,
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// Custom SVM coefficients; `None` uses OpenCV's default people detector.
    pub hog_weights_path: Option<PathBuf>,
    pub hog_hit_threshold: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            kind: DetectorKind::Learned,
            model_path: PathBuf::from("models/yolov8n.onnx"),
            labels_path: None,
            input_size: 640,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            hog_weights_path: None,
            hog_hit_threshold: 0.0,
        }
    }
}

/// Construct exactly the configured variant.
///
/// Fails with `SentryError::DetectorUnavailable` when the backend cannot be
/// initialised.
pub fn build_detector(cfg: &DetectorConfig) -> Result<Box<dyn DetectorBackend>> {
    build_kind(cfg.kind, cfg)
}

/// Construct the configured variant, degrading to the classical detector and
/// finally to the null detector. Never fails.
pub fn build_detector_with_fallback(cfg: &DetectorConfig) -> Box<dyn DetectorBackend> {
    let chain: &[DetectorKind] = match cfg.kind {
        DetectorKind::Learned => &[DetectorKind::Learned, DetectorKind::Classical],
        DetectorKind::Classical => &[DetectorKind::Classical],
        DetectorKind::None => &[],
    };
    for kind in chain {
        match build_kind(*kind, cfg) {
            Ok(mut backend) => {
                if let Err(e) = backend.warm_up() {
                    log::warn!("detector {} warm-up failed: {}", backend.name(), e);
                }
                log::info!("detector backend: {}", backend.name());
                return backend;
            }
            Err(e) => log::warn!("{}; trying next detector", e),
        }
    }
    log::warn!("no detector available; streaming without detections");
    Box::new(NullBackend::new())
}

fn build_kind(kind: DetectorKind, cfg: &DetectorConfig) -> Result<Box<dyn DetectorBackend>> {
    match kind {
        DetectorKind::Learned => build_learned(cfg),
        DetectorKind::Classical => {
            let params = HogParams {
                hit_threshold: cfg.hog_hit_threshold,
                ..HogParams::default()
            };
            let backend = match &cfg.hog_weights_path {
                Some(path) => HogBackend::load(path, params)?,
                None => HogBackend::new(params)?,
            };
            Ok(Box::new(backend))
        }
        DetectorKind::None => Ok(Box::new(NullBackend::new())),
    }
}

#[cfg(feature = "backend-tract")]
fn build_learned(cfg: &DetectorConfig) -> Result<Box<dyn DetectorBackend>> {
    use super::backends::TractBackend;

    let labels = match &cfg.labels_path {
        Some(path) => TractBackend::load_labels(path).unwrap_or_else(|e| {
            log::warn!("{}; class ids will be reported numerically", e);
            Vec::new()
        }),
        None => Vec::new(),
    };
    let backend = TractBackend::new(&cfg.model_path, cfg.input_size, cfg.input_size)?
        .with_threshold(cfg.confidence_threshold)
        .with_iou_threshold(cfg.iou_threshold)
        .with_labels(labels);
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn build_learned(_cfg: &DetectorConfig) -> Result<Box<dyn DetectorBackend>> {
    Err(crate::error::SentryError::detector_unavailable(
        "tract",
        "learned detector requires the backend-tract feature",
    )
    .into())
}
