//! Frame sources and the capture thread
//!
//! A [`FrameSource`] owns the camera (or a stand-in) and yields a lazy
//! sequence of frames. Exactly one thread reads from it: the capture thread
//! started by [`spawn_capture`], which decimates the stream and overwrites the
//! single-slot frame mailbox the recognition worker reads from.

mod replay;
mod stub;
#[cfg(feature = "camera-v4l2")]
mod v4l2;

use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::{oneshot, watch};

use crate::config::CameraConfig;
use crate::frame::Frame;
use crate::shutdown::Shutdown;
use crate::{Error, Result};

pub use replay::ReplaySource;
pub use stub::StubSource;
#[cfg(feature = "camera-v4l2")]
pub use v4l2::V4l2Source;

/// Lazy, possibly endless, sequence of captured frames
pub type Frames<'a> = Box<dyn Iterator<Item = Result<Frame>> + 'a>;

/// Camera-like producer of frames
///
/// Not shared: the capture thread is the only caller.
pub trait FrameSource: Send {
    /// Human readable source name for logs
    fn describe(&self) -> String;

    /// Open (or reopen) the device and return its frame stream
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened
    fn frames(&mut self) -> Result<Frames<'_>>;
}

/// Build a frame source from a selector string
///
/// Accepted forms: `stub://<name>`, `replay:<dir>`, a device index (`0`) or a
/// device path (`/dev/video0`).
///
/// # Errors
///
/// Returns error if the selector is malformed, the replay directory holds no
/// images, or V4L2 support was not compiled in
pub fn open_source(config: &CameraConfig) -> Result<Box<dyn FrameSource>> {
    let selector = config.source.trim();

    if selector.starts_with("stub://") {
        return Ok(Box::new(StubSource::new(
            config.width,
            config.height,
            config.fps,
        )));
    }

    if let Some(dir) = selector.strip_prefix("replay:") {
        return Ok(Box::new(ReplaySource::new(dir, config.fps)?));
    }

    open_device(selector, config)
}

#[cfg(feature = "camera-v4l2")]
fn open_device(selector: &str, config: &CameraConfig) -> Result<Box<dyn FrameSource>> {
    let path = if selector.chars().all(|c| c.is_ascii_digit()) {
        format!("/dev/video{selector}")
    } else {
        selector.to_string()
    };
    Ok(Box::new(V4l2Source::new(
        path,
        config.width,
        config.height,
        config.fps,
    )))
}

#[cfg(not(feature = "camera-v4l2"))]
fn open_device(selector: &str, _config: &CameraConfig) -> Result<Box<dyn FrameSource>> {
    Err(Error::Camera(format!(
        "camera '{selector}' needs the camera-v4l2 feature; use replay:<dir> or stub:// instead"
    )))
}

/// Capture loop tuning
#[derive(Debug, Clone, Copy)]
pub struct CaptureOptions {
    /// Submit every Nth frame
    pub every_n: u32,
    /// Reopen attempts after a read failure before giving up
    pub reopen_attempts: u32,
    /// Wait between reopen attempts
    pub reopen_backoff: Duration,
}

impl CaptureOptions {
    #[must_use]
    pub const fn from_config(config: &CameraConfig) -> Self {
        Self {
            every_n: config.process_every_n_frames,
            reopen_attempts: config.reopen_attempts,
            reopen_backoff: Duration::from_millis(500),
        }
    }
}

/// Counters reported when the capture thread exits
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureStats {
    pub captured: u64,
    pub submitted: u64,
    pub reopens: u32,
}

/// Start the capture thread
///
/// The returned receiver resolves once the source opened (or failed to open),
/// so startup device faults can be reported before anything else runs. Frames
/// are published into `slot`, replacing whatever the worker has not consumed.
///
/// # Errors
///
/// Returns error if the thread cannot be spawned
pub fn spawn_capture(
    source: Box<dyn FrameSource>,
    options: CaptureOptions,
    slot: watch::Sender<Option<Frame>>,
    shutdown: Shutdown,
) -> Result<(JoinHandle<Result<CaptureStats>>, oneshot::Receiver<Result<()>>)> {
    let (ready_tx, ready_rx) = oneshot::channel();

    let handle = std::thread::Builder::new()
        .name("warden-capture".to_string())
        .spawn(move || run_capture(source, options, &slot, &shutdown, ready_tx))?;

    Ok((handle, ready_rx))
}

fn run_capture(
    mut source: Box<dyn FrameSource>,
    options: CaptureOptions,
    slot: &watch::Sender<Option<Frame>>,
    shutdown: &Shutdown,
    ready: oneshot::Sender<Result<()>>,
) -> Result<CaptureStats> {
    let name = source.describe();
    let every_n = u64::from(options.every_n.max(1));
    let mut stats = CaptureStats::default();
    let mut ready = Some(ready);
    let mut failures = 0u32;

    tracing::info!(source = %name, every_n, "capture starting");

    while !shutdown.is_triggered() {
        let frames = match source.frames() {
            Ok(frames) => frames,
            Err(e) => {
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Err(e));
                    return Err(Error::Camera(format!("{name}: open failed")));
                }
                failures += 1;
                tracing::warn!(source = %name, attempt = failures, error = %e, "camera reopen failed");
                if failures > options.reopen_attempts {
                    return Err(Error::Camera(format!(
                        "{name}: giving up after {failures} reopen attempts"
                    )));
                }
                std::thread::sleep(options.reopen_backoff);
                continue;
            }
        };

        if let Some(tx) = ready.take() {
            let _ = tx.send(Ok(()));
        }

        for item in frames {
            if shutdown.is_triggered() {
                break;
            }
            match item {
                Ok(frame) => {
                    failures = 0;
                    stats.captured += 1;
                    if stats.captured % every_n == 0 {
                        stats.submitted += 1;
                        slot.send_replace(Some(frame));
                    }
                }
                Err(e) => {
                    tracing::warn!(source = %name, error = %e, "frame read failed, reopening");
                    break;
                }
            }
        }

        if shutdown.is_triggered() {
            break;
        }

        failures += 1;
        stats.reopens += 1;
        if failures > options.reopen_attempts {
            return Err(Error::Camera(format!(
                "{name}: stream ended after {failures} reopen attempts"
            )));
        }
        std::thread::sleep(options.reopen_backoff);
    }

    tracing::info!(
        source = %name,
        captured = stats.captured,
        submitted = stats.submitted,
        "capture stopped"
    );
    Ok(stats)
}
