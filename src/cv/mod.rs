pub mod capture;
pub mod compose;
pub mod engine;
pub mod frame_metrics;
pub mod recognize;

use anyhow::{Result, anyhow};
use log::{debug, info, warning};
use opencv::core::Mat;
use opencv::prelude::*;
use opencv::videoio::{self, VideoCapture};
use serde::Serialize;

/// Device indices probed in ascending order when opening the camera.
const PROBE_INDICES: std::ops::Range<i32> = 0..4;

const FRAME_WIDTH: f64 = 640.0;
const FRAME_HEIGHT: f64 = 480.0;
const TARGET_FPS: f64 = 15.0;

/// Frames handed to the recognition worker are shrunk by this factor per axis.
pub const DOWNSAMPLE: f64 = 0.5;

/// Face bounding box in `(top, right, bottom, left)` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BBox {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl BBox {
    pub fn new(top: i32, right: i32, bottom: i32, left: i32) -> Self {
        Self {
            top,
            right,
            bottom,
            left,
        }
    }

    /// Multiplies every coordinate, used to map downsampled-space boxes back
    /// into full-frame space.
    pub fn scaled(self, factor: i32) -> Self {
        Self {
            top: self.top * factor,
            right: self.right * factor,
            bottom: self.bottom * factor,
            left: self.left * factor,
        }
    }

    pub fn to_rect(self) -> opencv::core::Rect {
        opencv::core::Rect::new(
            self.left,
            self.top,
            (self.right - self.left).max(1),
            (self.bottom - self.top).max(1),
        )
    }
}

/// One classified face, in full-frame coordinates. The recognition worker
/// replaces the shared list of these wholesale every cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionResult {
    pub label: String,
    pub confidence: f64,
    pub bbox: BBox,
}

impl RecognitionResult {
    pub fn is_unknown(&self) -> bool {
        self.label == crate::catalog::UNKNOWN_LABEL
    }
}

/// Readable source of raw frames behind the capture worker. [`FrameSource`]
/// is the production implementation; tests substitute synthetic sources.
pub trait VideoSource: Send {
    /// Grabs one frame. `Ok(None)` is a missed frame (transient, skip it);
    /// `Err` is a hard device failure.
    fn read(&mut self) -> Result<Option<Mat>>;

    /// Releases the underlying device. Idempotent.
    fn close(&mut self);
}

/// A video device handle with an exactly-once release guarantee.
///
/// `open` probes a small set of device indices and keeps the first one that
/// both opens and yields a readable test frame. The handle is owned by the
/// session controller and only read by the capture worker.
pub struct FrameSource {
    cap: Option<VideoCapture>,
    index: i32,
}

impl FrameSource {
    pub fn open() -> Result<Self> {
        for index in PROBE_INDICES {
            let mut cap = match VideoCapture::new(index, videoio::CAP_ANY) {
                Ok(cap) => cap,
                Err(e) => {
                    debug!("Device index {index} failed to construct: {e}");
                    continue;
                }
            };

            if !cap.is_opened().unwrap_or(false) {
                debug!("Device index {index} did not open");
                continue;
            }

            let mut probe = Mat::default();
            match cap.read(&mut probe) {
                Ok(true) if !probe.empty() => {
                    info!("Camera found at index {index}");
                    let mut source = Self {
                        cap: Some(cap),
                        index,
                    };
                    source.configure();
                    return Ok(source);
                }
                _ => {
                    debug!("Device index {index} opened but yielded no frame");
                    let _ = cap.release();
                }
            }
        }

        Err(anyhow!(
            "no camera found or cannot access camera (probed indices {PROBE_INDICES:?})"
        ))
    }

    /// Fixed low-latency settings: small resolution, capped rate, a single
    /// buffered frame, no autofocus, manual exposure mode.
    fn configure(&mut self) {
        let Some(cap) = self.cap.as_mut() else {
            return;
        };

        let settings = [
            (videoio::CAP_PROP_FRAME_WIDTH, FRAME_WIDTH),
            (videoio::CAP_PROP_FRAME_HEIGHT, FRAME_HEIGHT),
            (videoio::CAP_PROP_FPS, TARGET_FPS),
            (videoio::CAP_PROP_BUFFERSIZE, 1.0),
            (videoio::CAP_PROP_AUTOFOCUS, 0.0),
            (videoio::CAP_PROP_AUTO_EXPOSURE, 1.0),
        ];

        for (prop, value) in settings {
            match cap.set(prop, value) {
                Ok(true) => {}
                Ok(false) => debug!("Camera property {prop} rejected value {value}"),
                Err(e) => warning!("Failed to set camera property {prop}: {e}"),
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.cap.is_some()
    }

    /// Grabs one frame. `Ok(None)` is a missed frame (transient, skip it);
    /// `Err` is a hard device failure.
    pub fn read(&mut self) -> Result<Option<Mat>> {
        let cap = self
            .cap
            .as_mut()
            .ok_or_else(|| anyhow!("frame source is closed"))?;

        let mut frame = Mat::default();
        if cap.read(&mut frame)? && !frame.empty() {
            Ok(Some(frame))
        } else {
            Ok(None)
        }
    }

    /// Releases the device. Idempotent; subsequent reads fail cleanly.
    pub fn close(&mut self) {
        if let Some(mut cap) = self.cap.take() {
            if let Err(e) = cap.release() {
                warning!("Camera release failed: {e}");
            } else {
                debug!("Camera at index {} released", self.index);
            }
        }
    }
}

impl VideoSource for FrameSource {
    fn read(&mut self) -> Result<Option<Mat>> {
        FrameSource::read(self)
    }

    fn close(&mut self) {
        FrameSource::close(self);
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        FrameSource::close(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_scaling_round_trips_downsample_factor() {
        let observed = BBox::new(10, 40, 30, 20);
        let full = observed.scaled(2);
        assert_eq!(full, BBox::new(20, 80, 60, 40));
    }

    #[test]
    fn bbox_to_rect_never_degenerates() {
        let rect = BBox::new(5, 5, 5, 5).to_rect();
        assert_eq!((rect.width, rect.height), (1, 1));
        assert_eq!((rect.x, rect.y), (5, 5));
    }

    #[test]
    fn closed_source_read_fails_cleanly() {
        let mut source = FrameSource { cap: None, index: 0 };
        assert!(!source.is_open());
        assert!(source.read().is_err());
        // close on an already-closed source is a no-op
        source.close();
    }
}
