use thiserror::Error;

/// Failure taxonomy for the analytics pipeline.
///
/// Only the construction-time variants are fatal. Per-frame variants are
/// recovered inside the producer loop and never end the stream.
#[derive(Debug, Error)]
pub enum SentryError {
    /// A detection backend could not be constructed.
    #[error("detector '{backend}' unavailable: {reason}")]
    DetectorUnavailable { backend: &'static str, reason: String },

    /// The capture source could not be opened.
    #[error("capture source '{source_url}' unavailable: {reason}")]
    CaptureUnavailable { source_url: String, reason: String },

    /// A single frame read failed; the caller waits briefly and retries.
    #[error("transient read failure: {0}")]
    TransientReadFailure(String),

    /// The detector failed on one frame; the frame is treated as empty.
    #[error("detection failure: {0}")]
    DetectionFailure(String),
}

impl SentryError {
    pub fn detector_unavailable(backend: &'static str, reason: impl Into<String>) -> Self {
        Self::DetectorUnavailable {
            backend,
            reason: reason.into(),
        }
    }

    pub fn capture_unavailable(source_url: &str, reason: impl Into<String>) -> Self {
        Self::CaptureUnavailable {
            source_url: source_url.to_string(),
            reason: reason.into(),
        }
    }

    /// True for failures that end the subsystem.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DetectorUnavailable { .. } | Self::CaptureUnavailable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_construction_failures_are_fatal() {
        assert!(SentryError::detector_unavailable("tract", "no model").is_fatal());
        assert!(SentryError::capture_unavailable("0", "busy").is_fatal());
        assert!(!SentryError::TransientReadFailure("eof".into()).is_fatal());
        assert!(!SentryError::DetectionFailure("shape".into()).is_fatal());
    }

    #[test]
    fn survives_anyhow_round_trip() {
        let err: anyhow::Error = SentryError::detector_unavailable("hog", "missing weights").into();
        let typed = err.downcast_ref::<SentryError>().expect("typed error");
        assert!(matches!(typed, SentryError::DetectorUnavailable { backend: "hog", .. }));
        assert_eq!(
            err.to_string(),
            "detector 'hog' unavailable: missing weights"
        );
    }
}
