//! V4L2 camera source
//!
//! Requests MJPEG at the configured size and decodes each buffer to RGB. The
//! device handle lives in the source so a reopen drops the old stream first.

use image::ImageFormat;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::{FrameSource, Frames};
use crate::frame::Frame;
use crate::{Error, Result};

const BUFFER_COUNT: u32 = 4;

/// Local camera device
pub struct V4l2Source {
    path: String,
    width: u32,
    height: u32,
    fps: u32,
    device: Option<Device>,
    seq: u64,
}

impl V4l2Source {
    #[must_use]
    pub const fn new(path: String, width: u32, height: u32, fps: u32) -> Self {
        Self {
            path,
            width,
            height,
            fps,
            device: None,
            seq: 0,
        }
    }

    fn open_device(&self) -> Result<Device> {
        let device = Device::with_path(&self.path)
            .map_err(|e| Error::Camera(format!("cannot open {}: {e}", self.path)))?;

        let mut format = device
            .format()
            .map_err(|e| Error::Camera(format!("cannot read format of {}: {e}", self.path)))?;
        format.width = self.width;
        format.height = self.height;
        format.fourcc = FourCC::new(b"MJPG");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(e) => {
                tracing::warn!(device = %self.path, error = %e, "could not set format, using device default");
                device
                    .format()
                    .map_err(|e| Error::Camera(format!("cannot read format: {e}")))?
            }
        };

        if format.fourcc != FourCC::new(b"MJPG") {
            return Err(Error::Camera(format!(
                "{} does not deliver MJPEG (got {})",
                self.path, format.fourcc
            )));
        }

        let params = v4l::video::capture::Parameters::with_fps(self.fps);
        if let Err(e) = device.set_params(&params) {
            tracing::warn!(device = %self.path, error = %e, "could not set frame rate");
        }

        if format.width != self.width || format.height != self.height {
            tracing::warn!(
                device = %self.path,
                requested = %format_args!("{}x{}", self.width, self.height),
                actual = %format_args!("{}x{}", format.width, format.height),
                "camera resolution differs from requested"
            );
        }

        tracing::info!(
            device = %self.path,
            width = format.width,
            height = format.height,
            "camera opened"
        );
        Ok(device)
    }
}

impl FrameSource for V4l2Source {
    fn describe(&self) -> String {
        self.path.clone()
    }

    fn frames(&mut self) -> Result<Frames<'_>> {
        // Release the previous handle before reopening
        self.device = None;
        let device = self.open_device()?;

        let Self {
            path, device: slot, seq, ..
        } = self;
        let device = slot.insert(device);

        let mut stream = Stream::with_buffers(device, Type::VideoCapture, BUFFER_COUNT)
            .map_err(|e| Error::Camera(format!("cannot start stream on {path}: {e}")))?;

        let path = path.as_str();
        Ok(Box::new(std::iter::from_fn(move || {
            let frame = match stream.next() {
                Ok((buf, meta)) => {
                    let used = (meta.bytesused as usize).min(buf.len());
                    image::load_from_memory_with_format(&buf[..used], ImageFormat::Jpeg)
                        .map(|decoded| {
                            *seq += 1;
                            Frame::new(*seq, decoded.to_rgb8())
                        })
                        .map_err(|e| Error::Camera(format!("{path}: bad MJPEG frame: {e}")))
                }
                Err(e) => Err(Error::Camera(format!("{path}: capture failed: {e}"))),
            };
            Some(frame)
        })))
    }
}
