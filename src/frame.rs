//! Frame types that flow through the analytics pipeline.
//!
//! - `Frame`: decoded RGB pixels owned by the producer for one iteration.
//! - `EncodedFrame`: immutable JPEG bytes shared with every subscriber.
//!
//! A `Frame` is never shared across threads. Once annotated it is encoded
//! exactly once and only the `EncodedFrame` leaves the producer.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{GrayImage, RgbImage};
use opencv::{core::Mat, prelude::*};
use std::sync::Arc;
use std::time::Instant;

/// Default JPEG quality for the outgoing stream and snapshots.
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

// ----------------------------------------------------------------------------
// Frame: producer-owned pixels
// ----------------------------------------------------------------------------

/// One captured video frame (3-channel RGB).
pub struct Frame {
    image: RgbImage,
    /// Capture order, strictly increasing per source.
    pub seq: u64,
    captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbImage, seq: u64) -> Self {
        Self {
            image,
            seq,
            captured_at: Instant::now(),
        }
    }

    /// Build a frame from packed RGB24 bytes.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, seq: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("invalid RGB buffer for {}x{}", width, height))?;
        Ok(Self::new(image, seq))
    }

    /// Decode a JPEG/PNG payload into a frame.
    pub fn decode(bytes: &[u8], seq: u64) -> Result<Self> {
        let image = image::load_from_memory(bytes).context("decode frame")?;
        Ok(Self::new(image.into_rgb8(), seq))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    pub fn age_ms(&self) -> u128 {
        self.captured_at.elapsed().as_millis()
    }

    /// Single-channel luminance copy.
    pub fn gray(&self) -> GrayImage {
        image::imageops::grayscale(&self.image)
    }

    /// Uniformly downscale so the width does not exceed `max_width`.
    ///
    /// Returns true if the frame was resized.
    pub fn fit_width(&mut self, max_width: u32) -> bool {
        let (w, h) = self.image.dimensions();
        if max_width == 0 || w <= max_width {
            return false;
        }
        let scale = max_width as f64 / w as f64;
        let new_h = ((h as f64 * scale) as u32).max(1);
        self.image = image::imageops::resize(&self.image, max_width, new_h, FilterType::Triangle);
        true
    }

    /// Encode the frame once for distribution.
    pub fn encode(&self, quality: u8) -> Result<EncodedFrame> {
        Ok(EncodedFrame {
            seq: self.seq,
            jpeg: encode_jpeg(&self.image, quality)?.into(),
        })
    }
}

/// JPEG-encode an RGB image.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(image.as_raw().len() / 8);
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    encoder.encode_image(image).context("encode jpeg")?;
    Ok(out)
}

/// Owned 8-bit single-channel `Mat` with the image's pixels.
pub fn gray_to_mat(image: &GrayImage) -> Result<Mat> {
    buffer_to_mat(image.as_raw(), 1, image.height())
}

/// Owned 8-bit 3-channel `Mat` in RGB channel order.
pub fn rgb_to_mat(image: &RgbImage) -> Result<Mat> {
    buffer_to_mat(image.as_raw(), 3, image.height())
}

fn buffer_to_mat(raw: &[u8], channels: i32, rows: u32) -> Result<Mat> {
    if raw.is_empty() {
        return Err(anyhow!("empty image"));
    }
    let flat = Mat::from_slice(raw)?;
    let shaped = flat.reshape(channels, rows as i32)?;
    Ok(shaped.try_clone()?)
}

// ----------------------------------------------------------------------------
// EncodedFrame: immutable distribution copy
// ----------------------------------------------------------------------------

/// JPEG bytes of one fully annotated frame. Cloning shares the payload.
#[derive(Clone, Debug)]
pub struct EncodedFrame {
    pub seq: u64,
    pub jpeg: Arc<[u8]>,
}

impl EncodedFrame {
    pub fn len(&self) -> usize {
        self.jpeg.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jpeg.is_empty()
    }
}
