#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{nms, Detection};
use crate::error::SentryError;
use crate::geometry::BBox;

/// Tract-based backend for YOLOv8-style ONNX detectors.
///
/// The model is expected to take `[1, 3, H, W]` RGB in `[0, 1]` and return
/// `[1, 4 + C, N]`: centre-x, centre-y, width, height in input pixels followed
/// by one score per class. Class names come from an optional label table;
/// unnamed classes are reported by their numeric id.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    width: u32,
    height: u32,
    labels: Vec<String>,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .and_then(|model| {
                model.with_input_fact(
                    0,
                    InferenceFact::dt_shape(
                        f32::datum_type(),
                        tvec!(1, 3, height as usize, width as usize),
                    ),
                )
            })
            .and_then(|model| model.into_optimized())
            .and_then(|model| model.into_runnable())
            .map_err(|e| {
                SentryError::detector_unavailable(
                    "tract",
                    format!("failed to load ONNX model {}: {}", model_path.display(), e),
                )
            })?;

        log::info!(
            "TractBackend: loaded {} ({}x{})",
            model_path.display(),
            width,
            height
        );

        Ok(Self {
            model,
            width,
            height,
            labels: Vec::new(),
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Override the default NMS overlap threshold.
    pub fn with_iou_threshold(mut self, threshold: f32) -> Self {
        self.iou_threshold = threshold;
        self
    }

    /// Attach a label table (index = class id).
    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    /// Read a label table with one class name per line.
    pub fn load_labels<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read labels {}", path.display()))?;
        Ok(raw.lines().map(|line| line.trim().to_string()).collect())
    }

    fn build_input(&self, frame: &RgbImage) -> Tensor {
        let resized = image::imageops::resize(frame, self.width, self.height, FilterType::Triangle);
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        input.into_tensor()
    }

    fn class_name(&self, id: usize) -> String {
        self.labels
            .get(id)
            .filter(|name| !name.is_empty())
            .cloned()
            .unwrap_or_else(|| id.to_string())
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 || shape[1] <= 4 {
            return Err(anyhow!("unexpected model output shape {:?}", shape));
        }
        let data: Vec<f32> = view.iter().copied().collect();
        let raw = decode_predictions(
            &data,
            shape[1],
            shape[2],
            self.confidence_threshold,
        );

        let sx = frame.width() as f32 / self.width as f32;
        let sy = frame.height() as f32 / self.height as f32;
        let detections = raw
            .into_iter()
            .map(|(bbox, class_id, score)| {
                let scaled = BBox::new(bbox.x1 * sx, bbox.y1 * sy, bbox.x2 * sx, bbox.y2 * sy)
                    .clamp(frame.width(), frame.height());
                Detection::new(scaled, self.class_name(class_id), score)
            })
            .collect();
        Ok(nms(detections, self.iou_threshold))
    }
}

/// Decode a `[4 + C, N]` channel-major prediction block into boxes in model
/// input pixels, keeping the best class per anchor above `threshold`.
fn decode_predictions(
    data: &[f32],
    channels: usize,
    anchors: usize,
    threshold: f32,
) -> Vec<(BBox, usize, f32)> {
    let at = |c: usize, i: usize| data[c * anchors + i];
    let mut out = Vec::new();
    for i in 0..anchors {
        let mut best = (0usize, f32::NEG_INFINITY);
        for c in 4..channels {
            let score = at(c, i);
            if score > best.1 {
                best = (c - 4, score);
            }
        }
        if best.1 < threshold {
            continue;
        }
        let (cx, cy, w, h) = (at(0, i), at(1, i), at(2, i), at(3, i));
        out.push((
            BBox::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0),
            best.0,
            best.1,
        ));
    }
    out
}
