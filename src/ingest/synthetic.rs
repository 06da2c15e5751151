//! Synthetic source (`stub://`) for tests and demos.
//!
//! Renders a smooth periodic texture that pans horizontally by a fixed number
//! of pixels per frame, so the motion estimator sees real, uniform motion.

use std::thread;
use std::time::Instant;

use anyhow::Result;
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{frame_interval, FrameSource, SourceStats};
use crate::frame::Frame;

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;

pub struct SyntheticSource {
    url: String,
    target_fps: u32,
    width: u32,
    height: u32,
    speed_px: f32,
    phase: [f32; 3],
    frame_count: u64,
    last_frame_at: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(url: &str, target_fps: u32) -> Self {
        // Phases derive from the url so two stubs with the same name agree.
        let seed = url
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325u64, |h, b| (h ^ b as u64).wrapping_mul(0x100_0000_01b3));
        let mut rng = StdRng::seed_from_u64(seed);
        let phase = [
            rng.gen_range(0.0..std::f32::consts::TAU),
            rng.gen_range(0.0..std::f32::consts::TAU),
            rng.gen_range(0.0..std::f32::consts::TAU),
        ];
        Self {
            url: url.to_string(),
            target_fps,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            speed_px: 2.0,
            phase,
            frame_count: 0,
            last_frame_at: None,
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width.max(1);
        self.height = height.max(1);
        self
    }

    /// Horizontal pan per frame in pixels. 0 yields a static scene.
    pub fn with_speed(mut self, speed_px: f32) -> Self {
        self.speed_px = speed_px;
        self
    }

    fn render(&self) -> RgbImage {
        let shift = self.frame_count as f32 * self.speed_px;
        let [p0, p1, p2] = self.phase;
        RgbImage::from_fn(self.width, self.height, |x, y| {
            let xf = x as f32 - shift;
            let yf = y as f32;
            let base = 128.0 + 50.0 * (xf * 0.3 + p0).sin() + 50.0 * (yf * 0.25 + p1).cos();
            let tint = 20.0 * (xf * 0.05 + yf * 0.05 + p2).sin();
            Rgb([
                (base + tint).clamp(0.0, 255.0) as u8,
                base.clamp(0.0, 255.0) as u8,
                (base - tint).clamp(0.0, 255.0) as u8,
            ])
        })
    }

    fn pace(&mut self) {
        let interval = frame_interval(self.target_fps);
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        log::info!(
            "SyntheticSource: connected to {} ({}x{})",
            self.url,
            self.width,
            self.height
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        self.pace();
        let image = self.render();
        self.frame_count += 1;
        Ok(Frame::new(image, self.frame_count))
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.url.clone(),
        }
    }
}
