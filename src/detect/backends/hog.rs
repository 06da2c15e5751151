//! Classical sliding-window person detector.
//!
//! OpenCV's HOG descriptor (64x128 window) scored by a linear SVM. The
//! bundled Dalal-Triggs people coefficients are used unless a custom
//! coefficient file is configured. Only the `person` class is produced.

use anyhow::Result;
use image::RgbImage;
use opencv::{
    core::{Rect, Size, Vector},
    objdetect::HOGDescriptor,
    prelude::*,
};
use std::path::Path;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::error::SentryError;
use crate::frame::rgb_to_mat;
use crate::geometry::BBox;

/// Detection window of the default people descriptor.
pub const WINDOW: (u32, u32) = (64, 128);

/// `detectMultiScale` parameters.
#[derive(Clone, Debug)]
pub struct HogParams {
    /// Window stride in pixels.
    pub win_stride: i32,
    /// Border added around the image before scanning.
    pub padding: i32,
    /// Pyramid scale factor between levels.
    pub scale: f64,
    /// SVM margin a window must exceed to count as a hit.
    pub hit_threshold: f32,
    /// Minimum cluster size when grouping overlapping hits.
    pub group_threshold: f64,
}

impl Default for HogParams {
    fn default() -> Self {
        Self {
            win_stride: 8,
            padding: 8,
            scale: 1.05,
            hit_threshold: 0.0,
            group_threshold: 2.0,
        }
    }
}

/// HOG + linear SVM person detector.
pub struct HogBackend {
    hog: HOGDescriptor,
    params: HogParams,
}

impl HogBackend {
    /// Default people detector shipped with OpenCV.
    pub fn new(params: HogParams) -> Result<Self> {
        let coefficients = HOGDescriptor::get_default_people_detector().map_err(unavailable)?;
        Self::from_coefficients(coefficients, params)
    }

    /// Custom coefficients: one weight per descriptor element, optionally
    /// followed by the bias.
    pub fn from_coefficients(coefficients: Vector<f32>, params: HogParams) -> Result<Self> {
        if params.scale <= 1.0 || params.win_stride <= 0 {
            return Err(SentryError::detector_unavailable(
                "hog",
                "pyramid scale must be > 1 and stride >= 1 px",
            )
            .into());
        }
        let mut hog = HOGDescriptor::default().map_err(unavailable)?;
        let descriptor_len = hog.get_descriptor_size().map_err(unavailable)?;
        if coefficients.len() != descriptor_len && coefficients.len() != descriptor_len + 1 {
            return Err(SentryError::detector_unavailable(
                "hog",
                format!(
                    "expected {} or {} SVM coefficients, got {}",
                    descriptor_len,
                    descriptor_len + 1,
                    coefficients.len()
                ),
            )
            .into());
        }
        hog.set_svm_detector(&coefficients).map_err(unavailable)?;
        Ok(Self { hog, params })
    }

    /// Load SVM coefficients from a whitespace or comma separated text file.
    pub fn load<P: AsRef<Path>>(path: P, params: HogParams) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SentryError::detector_unavailable(
                "hog",
                format!("failed to read SVM weights {}: {}", path.display(), e),
            )
        })?;
        let coefficients = raw
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|token| !token.is_empty())
            .map(|token| token.parse::<f32>())
            .collect::<std::result::Result<Vector<f32>, _>>()
            .map_err(|e| {
                SentryError::detector_unavailable(
                    "hog",
                    format!("invalid SVM weights {}: {}", path.display(), e),
                )
            })?;
        let backend = Self::from_coefficients(coefficients, params)?;
        log::info!("HogBackend: loaded SVM weights from {}", path.display());
        Ok(backend)
    }

    pub fn params(&self) -> &HogParams {
        &self.params
    }
}

fn unavailable(err: opencv::Error) -> anyhow::Error {
    SentryError::detector_unavailable("hog", err.to_string()).into()
}

impl DetectorBackend for HogBackend {
    fn name(&self) -> &'static str {
        "hog"
    }

    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>> {
        let (width, height) = frame.dimensions();
        if width < WINDOW.0 || height < WINDOW.1 {
            return Ok(Vec::new());
        }
        let mat = rgb_to_mat(frame)?;
        let mut found = Vector::<Rect>::new();
        let mut weights = Vector::<f64>::new();
        let p = &self.params;
        self.hog.detect_multi_scale_weights(
            &mat,
            &mut found,
            &mut weights,
            p.hit_threshold as f64,
            Size::new(p.win_stride, p.win_stride),
            Size::new(p.padding, p.padding),
            p.scale,
            p.group_threshold,
            false,
        )?;

        let detections = found
            .iter()
            .zip(weights.iter())
            .map(|(rect, score)| {
                let bbox = BBox::from_xywh(
                    rect.x as f32,
                    rect.y as f32,
                    rect.width as f32,
                    rect.height as f32,
                )
                .clamp(width, height);
                Detection::person(bbox, score as f32)
            })
            .collect();
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::io::Write;

    #[test]
    fn default_people_detector_builds() {
        let backend = HogBackend::new(HogParams::default());
        assert!(backend.is_ok(), "{:?}", backend.err());
    }

    #[test]
    fn rejects_wrong_weight_count() {
        let err = HogBackend::from_coefficients(Vector::from_iter([0.0f32; 10]), HogParams::default())
            .err()
            .expect("must fail");
        assert!(matches!(
            err.downcast_ref::<SentryError>(),
            Some(SentryError::DetectorUnavailable { backend: "hog", .. })
        ));
    }

    #[test]
    fn missing_weight_file_is_unavailable() {
        let err = HogBackend::load("/nonexistent/hog.txt", HogParams::default())
            .err()
            .expect("must fail");
        assert!(err.to_string().contains("unavailable"));
    }

    #[test]
    fn loads_weights_from_text() {
        let coefficients = HOGDescriptor::get_default_people_detector().unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let text = coefficients
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        file.write_all(text.as_bytes()).unwrap();
        assert!(HogBackend::load(file.path(), HogParams::default()).is_ok());
    }

    #[test]
    fn hits_are_people_inside_the_frame() {
        let mut backend = HogBackend::new(HogParams::default()).unwrap();
        let frame = RgbImage::from_fn(160, 200, |x, y| {
            let v = if (x / 16 + y / 16) % 2 == 0 { 30 } else { 220 };
            Rgb([v, v, v])
        });
        for det in backend.detect(&frame).unwrap() {
            assert_eq!(det.class, "person");
            assert!(det.bbox.x1 >= 0.0 && det.bbox.x2 <= 160.0);
            assert!(det.bbox.y1 >= 0.0 && det.bbox.y2 <= 200.0);
        }
    }

    #[test]
    fn frames_smaller_than_window_yield_nothing() {
        let mut backend = HogBackend::new(HogParams::default()).unwrap();
        let frame = RgbImage::from_pixel(32, 200, Rgb([0, 0, 0]));
        assert!(backend.detect(&frame).unwrap().is_empty());
    }
}
