//! Object detection backends.
//!
//! Backends form a closed set selected at construction time from
//! [`DetectorKind`]. See [`build_detector_with_fallback`] for the
//! degradation order used by the daemon.

mod backend;
mod backends;
mod registry;
mod result;

pub use backend::DetectorBackend;
pub use backends::{HogBackend, HogParams, NullBackend, ScriptedBackend};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use registry::{build_detector, build_detector_with_fallback, DetectorConfig, DetectorKind};
pub use result::{nms, partition_persons, Detection, PERSON_CLASS, PERSON_CLASS_ID};
