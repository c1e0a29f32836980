//! Directory replay source (`replay:<dir>`)
//!
//! Loops over the still images in a directory, in file name order, at a fixed
//! rate. Used for demos and headless runs without a camera.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use image::RgbImage;

use super::{FrameSource, Frames};
use crate::frame::Frame;
use crate::{Error, Result};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Replays still images as a looping video feed
pub struct ReplaySource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    interval: Duration,
    seq: u64,
}

impl ReplaySource {
    /// Scan `dir` for images
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be read or holds no images
    pub fn new(dir: impl AsRef<Path>, fps: u32) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let entries = std::fs::read_dir(&dir)
            .map_err(|e| Error::Camera(format!("cannot read {}: {e}", dir.display())))?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_image(path))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(Error::Camera(format!(
                "no images in replay directory {}",
                dir.display()
            )));
        }

        Ok(Self {
            dir,
            files,
            interval: Duration::from_secs(1) / fps.max(1),
            seq: 0,
        })
    }

    /// Number of images in the loop
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

impl FrameSource for ReplaySource {
    fn describe(&self) -> String {
        format!("replay {}", self.dir.display())
    }

    fn frames(&mut self) -> Result<Frames<'_>> {
        let mut stills: Vec<Arc<RgbImage>> = Vec::with_capacity(self.files.len());
        for path in &self.files {
            let image = image::open(path)
                .map_err(|e| Error::Camera(format!("{}: {e}", path.display())))?;
            stills.push(Arc::new(image.to_rgb8()));
        }

        tracing::info!(
            dir = %self.dir.display(),
            images = stills.len(),
            "replay source opened"
        );

        let interval = self.interval;
        let seq = &mut self.seq;
        Ok(Box::new(stills.into_iter().cycle().map(move |still| {
            std::thread::sleep(interval);
            *seq += 1;
            Ok(Frame::from_shared(*seq, still))
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(dir: &Path, name: &str, shade: u8) {
        let image = RgbImage::from_pixel(4, 4, image::Rgb([shade, shade, shade]));
        image.save(dir.join(name)).unwrap();
    }

    #[test]
    fn test_loops_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "b.png", 200);
        write_png(dir.path(), "a.png", 10);
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut source = ReplaySource::new(dir.path(), 1000).unwrap();
        assert_eq!(source.len(), 2);

        let shades: Vec<u8> = source
            .frames()
            .unwrap()
            .take(3)
            .map(|f| f.unwrap().image().get_pixel(0, 0)[0])
            .collect();
        assert_eq!(shades, vec![10, 200, 10]);
    }

    #[test]
    fn test_empty_directory_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ReplaySource::new(dir.path(), 10).is_err());
    }
}
