//! Image-sequence source: a directory of JPEG/PNG files played in name order
//! and looped, or an in-memory list of images.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;

use super::{frame_interval, FrameSource, SourceStats};
use crate::frame::Frame;

enum Clip {
    Files(Vec<PathBuf>),
    Images(Vec<RgbImage>),
}

impl Clip {
    fn len(&self) -> usize {
        match self {
            Self::Files(files) => files.len(),
            Self::Images(images) => images.len(),
        }
    }
}

pub struct ImageSequenceSource {
    name: String,
    clip: Clip,
    target_fps: u32,
    looped: bool,
    cursor: usize,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
}

impl ImageSequenceSource {
    /// Play every `.jpg`/`.jpeg`/`.png` file in `dir`, sorted by file name.
    pub fn from_dir<P: AsRef<Path>>(dir: P, target_fps: u32) -> Result<Self> {
        let dir = dir.as_ref();
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("read image directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_image(path))
            .collect();
        if files.is_empty() {
            return Err(anyhow!("no jpeg/png images in {}", dir.display()));
        }
        files.sort();
        Ok(Self::with_clip(dir.display().to_string(), Clip::Files(files), target_fps))
    }

    /// Play frames held in memory.
    pub fn from_images(name: &str, images: Vec<RgbImage>, target_fps: u32) -> Result<Self> {
        if images.is_empty() {
            return Err(anyhow!("image sequence '{}' is empty", name));
        }
        Ok(Self::with_clip(name.to_string(), Clip::Images(images), target_fps))
    }

    fn with_clip(name: String, clip: Clip, target_fps: u32) -> Self {
        Self {
            name,
            clip,
            target_fps,
            looped: true,
            cursor: 0,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
        }
    }

    /// Stop after one pass instead of looping; further reads fail.
    pub fn once(mut self) -> Self {
        self.looped = false;
        self
    }

    pub fn len(&self) -> usize {
        self.clip.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clip.len() == 0
    }

    fn load(&self, index: usize) -> Result<RgbImage> {
        match &self.clip {
            Clip::Files(files) => {
                let path = &files[index];
                let image = image::open(path)
                    .with_context(|| format!("decode {}", path.display()))?;
                Ok(image.into_rgb8())
            }
            Clip::Images(images) => Ok(images[index].clone()),
        }
    }

    fn pace(&mut self) {
        let interval = frame_interval(self.target_fps);
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }
    }
}

impl FrameSource for ImageSequenceSource {
    fn connect(&mut self) -> Result<()> {
        log::info!(
            "ImageSequenceSource: {} ({} frames)",
            self.name,
            self.clip.len()
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if self.cursor >= self.clip.len() {
            if !self.looped {
                return Err(anyhow!("image sequence '{}' finished", self.name));
            }
            self.cursor = 0;
        }
        self.pace();
        let index = self.cursor;
        self.cursor += 1;
        let image = self.load(index).map_err(|e| {
            self.last_error = Some(e.to_string());
            e
        })?;
        self.last_error = None;
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Ok(Frame::new(image, self.frame_count))
    }

    fn is_healthy(&self) -> bool {
        self.last_error.is_none() && (self.looped || self.cursor < self.clip.len())
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.name.clone(),
        }
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .is_some_and(|e| matches!(e.as_str(), "jpg" | "jpeg" | "png"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn plays_directory_in_name_order_and_loops() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        RgbImage::from_pixel(4, 4, Rgb([200, 0, 0])).save(tmp.path().join("b.png"))?;
        RgbImage::from_pixel(4, 4, Rgb([0, 200, 0])).save(tmp.path().join("a.png"))?;
        std::fs::write(tmp.path().join("readme.txt"), b"skip")?;

        let mut source = ImageSequenceSource::from_dir(tmp.path(), 0)?;
        assert_eq!(source.len(), 2);
        source.connect()?;
        let first = source.next_frame()?;
        assert_eq!(first.image().get_pixel(0, 0), &Rgb([0, 200, 0]));
        let second = source.next_frame()?;
        assert_eq!(second.image().get_pixel(0, 0), &Rgb([200, 0, 0]));
        let third = source.next_frame()?;
        assert_eq!(third.image().get_pixel(0, 0), &Rgb([0, 200, 0]));
        assert_eq!(third.seq, 3);
        Ok(())
    }

    #[test]
    fn single_pass_ends() -> Result<()> {
        let mut source =
            ImageSequenceSource::from_images("mem", vec![RgbImage::new(2, 2)], 0)?.once();
        source.next_frame()?;
        assert!(!source.is_healthy());
        assert!(source.next_frame().is_err());
        Ok(())
    }

    #[test]
    fn empty_inputs_are_rejected() {
        assert!(ImageSequenceSource::from_images("mem", Vec::new(), 0).is_err());
        let tmp = tempfile::tempdir().unwrap();
        assert!(ImageSequenceSource::from_dir(tmp.path(), 0).is_err());
    }
}
