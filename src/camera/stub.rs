//! Synthetic frame source (`stub://`)

use std::time::Duration;

use image::RgbImage;

use super::{FrameSource, Frames};
use crate::Result;
use crate::frame::Frame;

/// Produces blank frames at a fixed rate; never fails
pub struct StubSource {
    width: u32,
    height: u32,
    interval: Duration,
    seq: u64,
}

impl StubSource {
    #[must_use]
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            interval: Duration::from_secs(1) / fps.max(1),
            seq: 0,
        }
    }
}

impl FrameSource for StubSource {
    fn describe(&self) -> String {
        format!("stub {}x{}", self.width, self.height)
    }

    fn frames(&mut self) -> Result<Frames<'_>> {
        tracing::info!(width = self.width, height = self.height, "synthetic camera opened");

        let (width, height, interval) = (self.width, self.height, self.interval);
        let seq = &mut self.seq;
        Ok(Box::new(std::iter::from_fn(move || {
            std::thread::sleep(interval);
            *seq += 1;
            Some(Ok(Frame::new(*seq, RgbImage::new(width, height))))
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_continues_across_reopen() {
        let mut source = StubSource::new(8, 6, 1000);

        let first: Vec<u64> = source
            .frames()
            .unwrap()
            .take(2)
            .map(|f| f.unwrap().seq())
            .collect();
        let second = source.frames().unwrap().next().unwrap().unwrap();

        assert_eq!(first, vec![1, 2]);
        assert_eq!(second.seq(), 3);
        assert_eq!((second.width(), second.height()), (8, 6));
    }
}
