use anyhow::Result;
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;

/// Backend that never detects anything. Always constructible, so it is the
/// last link of the fallback chain: the stream keeps flowing with no boxes.
#[derive(Default)]
pub struct NullBackend;

impl NullBackend {
    pub fn new() -> Self {
        Self
    }
}

impl DetectorBackend for NullBackend {
    fn name(&self) -> &'static str {
        "none"
    }

    fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<Detection>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_backend_is_empty() {
        let mut backend = NullBackend::new();
        let frame = RgbImage::new(16, 16);
        assert!(backend.detect(&frame).unwrap().is_empty());
        assert_eq!(backend.name(), "none");
    }
}
