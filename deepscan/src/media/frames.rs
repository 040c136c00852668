// deepscan/src/media/frames.rs
//
// Frame decoding, uniform sampling and face regions.
//
// Face localisation is an injected capability: a `FaceLocator` is built once
// at startup and shared read-only (Arc) by every request's detectors.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::error::MediaError;

pub type Frame = RgbImage;

pub fn load_frame(path: &Path) -> Result<Frame, MediaError> {
    image::open(path)
        .map(|img| img.to_rgb8())
        .map_err(|source| MediaError::Frame { path: path.to_path_buf(), source })
}

pub fn resize_square(frame: &Frame, side: u32) -> Frame {
    imageops::resize(frame, side, side, FilterType::Triangle)
}

/// `count` indices spread evenly over `0..len`, endpoints included, truncated
/// towards zero. Repeats indices when `count > len`.
pub fn sample_indices(len: usize, count: usize) -> Vec<usize> {
    if len == 0 || count == 0 {
        return Vec::new();
    }
    if count == 1 {
        return vec![0];
    }
    let last = (len - 1) as f64;
    (0..count)
        .map(|i| ((i as f64 * last) / (count - 1) as f64) as usize)
        .collect()
}

// ── Face regions ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRegion {
    /// Forehead patch: upper quarter of the face box, middle half horizontally.
    /// Least affected by mouth and eye motion.
    pub fn forehead(&self) -> FaceRegion {
        FaceRegion {
            x:      self.x + self.width / 4,
            y:      self.y + self.height / 10,
            width:  (self.width / 2).max(1),
            height: (self.height / 4).max(1),
        }
    }

    /// Lower third of the face box.
    pub fn mouth(&self) -> FaceRegion {
        let top = self.y + self.height * 2 / 3;
        FaceRegion {
            x:      self.x + self.width / 5,
            y:      top,
            width:  (self.width * 3 / 5).max(1),
            height: (self.y + self.height - top).max(1),
        }
    }

    fn clamped(&self, frame: &Frame) -> Option<FaceRegion> {
        let (w, h) = frame.dimensions();
        if self.x >= w || self.y >= h {
            return None;
        }
        Some(FaceRegion {
            x:      self.x,
            y:      self.y,
            width:  self.width.min(w - self.x),
            height: self.height.min(h - self.y),
        })
    }
}

pub fn crop(frame: &Frame, region: FaceRegion) -> Frame {
    match region.clamped(frame) {
        Some(r) => imageops::crop_imm(frame, r.x, r.y, r.width, r.height).to_image(),
        None => frame.clone(),
    }
}

/// Per-channel means over `region`, in RGB order.
pub fn channel_means(frame: &Frame, region: FaceRegion) -> Option<[f64; 3]> {
    let r = region.clamped(frame)?;
    let mut sums = [0.0f64; 3];
    let mut n = 0u64;
    for y in r.y..r.y + r.height {
        for x in r.x..r.x + r.width {
            let p = frame.get_pixel(x, y);
            sums[0] += p[0] as f64;
            sums[1] += p[1] as f64;
            sums[2] += p[2] as f64;
            n += 1;
        }
    }
    if n == 0 {
        return None;
    }
    Some(sums.map(|s| s / n as f64))
}

pub fn mean_luma(frame: &Frame) -> f64 {
    let n = (frame.width() as u64 * frame.height() as u64).max(1) as f64;
    frame.pixels().map(|p| luma(p.0)).sum::<f64>() / n
}

pub fn luma(rgb: [u8; 3]) -> f64 {
    0.299 * rgb[0] as f64 + 0.587 * rgb[1] as f64 + 0.114 * rgb[2] as f64
}

pub trait FaceLocator: Send + Sync {
    /// Bounding box of the most prominent face, or None when there is none.
    fn locate(&self, frame: &Frame) -> Option<FaceRegion>;
}

/// Assumes a single, roughly centred subject, as in webcam and
/// talking-head footage. Rejects frames too small or too flat to hold a face.
#[derive(Debug, Clone)]
pub struct CentralFaceLocator {
    pub min_side: u32,
    /// Fraction of the shorter side covered by the box.
    pub coverage: f64,
    /// Minimum luma standard deviation inside the box.
    pub min_contrast: f64,
}

impl Default for CentralFaceLocator {
    fn default() -> Self {
        Self { min_side: 32, coverage: 0.6, min_contrast: 2.0 }
    }
}

impl FaceLocator for CentralFaceLocator {
    fn locate(&self, frame: &Frame) -> Option<FaceRegion> {
        let (w, h) = frame.dimensions();
        if w.min(h) < self.min_side {
            return None;
        }
        let side = ((w.min(h) as f64) * self.coverage) as u32;
        let region = FaceRegion { x: (w - side) / 2, y: (h - side) / 2, width: side, height: side };

        let mut n = 0.0;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for y in region.y..region.y + region.height {
            for x in region.x..region.x + region.width {
                let l = luma(frame.get_pixel(x, y).0);
                sum += l;
                sum_sq += l * l;
                n += 1.0;
            }
        }
        let var = (sum_sq / n - (sum / n).powi(2)).max(0.0);
        (var.sqrt() >= self.min_contrast).then_some(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn textured(w: u32, h: u32) -> Frame {
        RgbImage::from_fn(w, h, |x, y| Rgb([((x * 7 + y * 3) % 255) as u8, 90, 60]))
    }

    #[test]
    fn test_sample_indices_linspace() {
        assert_eq!(sample_indices(10, 5), vec![0, 2, 4, 6, 9]);
        assert_eq!(sample_indices(3, 5), vec![0, 0, 1, 1, 2]);
        assert_eq!(sample_indices(7, 1), vec![0]);
        assert!(sample_indices(0, 16).is_empty());
        assert_eq!(*sample_indices(100, 16).last().unwrap(), 99);
    }

    #[test]
    fn test_central_locator() {
        let loc = CentralFaceLocator::default();
        let region = loc.locate(&textured(200, 100)).unwrap();
        assert_eq!(region, FaceRegion { x: 70, y: 20, width: 60, height: 60 });

        assert!(loc.locate(&textured(20, 20)).is_none());
        assert!(loc.locate(&RgbImage::from_pixel(200, 200, Rgb([128, 128, 128]))).is_none());
    }

    #[test]
    fn test_channel_means_of_uniform_patch() {
        let frame  = RgbImage::from_pixel(64, 64, Rgb([10, 20, 30]));
        let region = FaceRegion { x: 8, y: 8, width: 40, height: 40 }.forehead();
        assert_eq!(channel_means(&frame, region), Some([10.0, 20.0, 30.0]));
    }

    #[test]
    fn test_crop_clamps_to_frame() {
        let frame = textured(50, 40);
        let out = crop(&frame, FaceRegion { x: 30, y: 30, width: 100, height: 100 });
        assert_eq!(out.dimensions(), (20, 10));
        let whole = crop(&frame, FaceRegion { x: 80, y: 0, width: 5, height: 5 });
        assert_eq!(whole.dimensions(), (50, 40));
    }
}
