//! Dense motion estimation between consecutive frames.
//!
//! The estimator keeps exactly one frame of history (the previous luminance
//! plane). Each update runs Farneback dense optical flow against it and
//! reduces the flow vectors to a per-pixel magnitude map.

use anyhow::{anyhow, Result};
use image::GrayImage;
use opencv::{
    core::{self, Mat, Vector},
    prelude::*,
    video,
};

use crate::frame::gray_to_mat;
use crate::geometry::BBox;

/// Farneback parameters.
#[derive(Clone, Debug)]
pub struct FlowParams {
    /// Scale between pyramid levels (< 1).
    pub pyr_scale: f64,
    /// Pyramid levels including the full-resolution one.
    pub levels: i32,
    /// Averaging window size.
    pub win_size: i32,
    /// Iterations per pyramid level.
    pub iterations: i32,
    /// Pixel neighbourhood for the polynomial expansion.
    pub poly_n: i32,
    /// Gaussian sigma smoothing the polynomial expansion derivatives.
    pub poly_sigma: f64,
    /// `OPTFLOW_*` flags.
    pub flags: i32,
}

impl Default for FlowParams {
    fn default() -> Self {
        Self {
            pyr_scale: 0.5,
            levels: 3,
            win_size: 15,
            iterations: 3,
            poly_n: 5,
            poly_sigma: 1.2,
            flags: 0,
        }
    }
}

// ----------------------------------------------------------------------------
// MotionField
// ----------------------------------------------------------------------------

/// Per-pixel motion magnitude aligned with the frame it was computed for.
#[derive(Clone, Debug, PartialEq)]
pub struct MotionField {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl MotionField {
    pub fn zeros(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width as usize * height as usize],
        }
    }

    pub fn from_vec(width: u32, height: u32, data: Vec<f32>) -> Option<Self> {
        if data.len() != width as usize * height as usize {
            return None;
        }
        Some(Self {
            width,
            height,
            data,
        })
    }

    /// Uniform field, mostly useful when exercising rules in isolation.
    pub fn filled(width: u32, height: u32, value: f32) -> Self {
        Self {
            width,
            height,
            data: vec![value; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.data[y as usize * self.width as usize + x as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, value: f32) {
        let w = self.width as usize;
        self.data[y as usize * w + x as usize] = value;
    }

    pub fn max(&self) -> f32 {
        self.data.iter().copied().fold(0.0, f32::max)
    }

    /// Mean magnitude over the whole field.
    pub fn mean(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().sum::<f32>() / self.data.len() as f32
    }

    /// Mean magnitude inside a box, clipped to the field. `None` if the
    /// clipped region is empty.
    pub fn mean_in(&self, region: &BBox) -> Option<f32> {
        let (x, y, w, h) = region.to_pixel_rect(self.width, self.height)?;
        let stride = self.width as usize;
        let mut sum = 0.0f64;
        for row in y..y + h {
            let start = row as usize * stride + x as usize;
            sum += self.data[start..start + w as usize]
                .iter()
                .map(|v| *v as f64)
                .sum::<f64>();
        }
        Some((sum / (w as f64 * h as f64)) as f32)
    }
}

// ----------------------------------------------------------------------------
// MotionEstimator
// ----------------------------------------------------------------------------

/// One-frame-deep dense motion estimator.
pub struct MotionEstimator {
    params: FlowParams,
    prev: Option<Mat>,
}

impl MotionEstimator {
    pub fn new(params: FlowParams) -> Self {
        Self { params, prev: None }
    }

    /// Whether a baseline frame has been stored.
    pub fn has_baseline(&self) -> bool {
        self.prev.is_some()
    }

    /// Drop the stored baseline; the next update behaves like the first.
    pub fn reset(&mut self) {
        self.prev = None;
    }

    /// Feed the next luminance frame and return the motion relative to the
    /// previous one. The first frame (and any frame whose size differs from
    /// the baseline) yields an all-zero field, as does a failed flow
    /// computation.
    pub fn update(&mut self, gray: &GrayImage) -> MotionField {
        let (w, h) = gray.dimensions();
        let current = match gray_to_mat(gray) {
            Ok(mat) => mat,
            Err(e) => {
                log::warn!("motion: failed to wrap luminance frame: {:#}", e);
                self.prev = None;
                return MotionField::zeros(w, h);
            }
        };

        let field = match self.prev.take() {
            Some(prev) if prev.cols() == w as i32 && prev.rows() == h as i32 => {
                match flow_magnitude(&prev, &current, &self.params) {
                    Ok(data) => MotionField::from_vec(w, h, data)
                        .unwrap_or_else(|| MotionField::zeros(w, h)),
                    Err(e) => {
                        log::warn!("motion: optical flow failed: {:#}", e);
                        MotionField::zeros(w, h)
                    }
                }
            }
            Some(_) => {
                log::debug!("motion baseline reset after resolution change to {}x{}", w, h);
                MotionField::zeros(w, h)
            }
            None => MotionField::zeros(w, h),
        };
        self.prev = Some(current);
        field
    }
}

impl Default for MotionEstimator {
    fn default() -> Self {
        Self::new(FlowParams::default())
    }
}

/// Farneback flow between two same-sized planes, reduced to row-major
/// magnitudes.
fn flow_magnitude(prev: &Mat, current: &Mat, p: &FlowParams) -> Result<Vec<f32>> {
    let mut flow = Mat::default();
    video::calc_optical_flow_farneback(
        prev,
        current,
        &mut flow,
        p.pyr_scale,
        p.levels,
        p.win_size,
        p.iterations,
        p.poly_n,
        p.poly_sigma,
        p.flags,
    )?;

    let mut planes = Vector::<Mat>::new();
    core::split(&flow, &mut planes)?;
    if planes.len() != 2 {
        return Err(anyhow!("expected 2 flow channels, got {}", planes.len()));
    }
    let dx = planes.get(0)?;
    let dy = planes.get(1)?;

    let mut magnitude = Mat::default();
    let mut angle = Mat::default();
    core::cart_to_polar(&dx, &dy, &mut magnitude, &mut angle, false)?;
    let magnitude = if magnitude.is_continuous() {
        magnitude
    } else {
        magnitude.try_clone()?
    };
    Ok(magnitude.data_typed::<f32>()?.to_vec())
}
