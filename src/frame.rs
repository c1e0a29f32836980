//! Captured video frames and face regions

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use image::RgbImage;

/// An immutable captured image with its capture time
///
/// Cloning is cheap: the pixel buffer is shared.
#[derive(Debug, Clone)]
pub struct Frame {
    seq: u64,
    captured_at: Instant,
    wall_time: DateTime<Utc>,
    image: Arc<RgbImage>,
}

impl Frame {
    /// Wrap a freshly captured image
    #[must_use]
    pub fn new(seq: u64, image: RgbImage) -> Self {
        Self {
            seq,
            captured_at: Instant::now(),
            wall_time: Utc::now(),
            image: Arc::new(image),
        }
    }

    /// Wrap an image that is already shared, such as a replayed still
    #[must_use]
    pub fn from_shared(seq: u64, image: Arc<RgbImage>) -> Self {
        Self {
            seq,
            captured_at: Instant::now(),
            wall_time: Utc::now(),
            image,
        }
    }

    /// Monotonic sequence number assigned by the frame source
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }

    #[must_use]
    pub const fn captured_at(&self) -> Instant {
        self.captured_at
    }

    #[must_use]
    pub const fn wall_time(&self) -> DateTime<Utc> {
        self.wall_time
    }

    #[must_use]
    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Axis-aligned face bounding box in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Region {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    #[must_use]
    pub const fn new(left: u32, top: u32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Map a region found on a downscaled image back to full-frame coordinates
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn upscale(self, factor: f32) -> Self {
        if factor <= 0.0 {
            return self;
        }
        let scale = |v: u32| (v as f32 / factor).round() as u32;
        Self {
            left: scale(self.left),
            top: scale(self.top),
            width: scale(self.width),
            height: scale(self.height),
        }
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{}+{}+{}",
            self.width, self.height, self.left, self.top
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upscale_quarter() {
        let r = Region::new(10, 20, 30, 40).upscale(0.25);
        assert_eq!(r, Region::new(40, 80, 120, 160));
    }

    #[test]
    fn test_upscale_ignores_nonpositive_factor() {
        let r = Region::new(1, 2, 3, 4);
        assert_eq!(r.upscale(0.0), r);
    }

    #[test]
    fn test_frame_clone_shares_pixels() {
        let frame = Frame::new(7, RgbImage::new(4, 2));
        let copy = frame.clone();
        assert_eq!(copy.seq(), 7);
        assert_eq!((copy.width(), copy.height()), (4, 2));
        assert!(std::ptr::eq(frame.image(), copy.image()));
    }
}
