use crate::cv::frame_metrics::FrameMetrics;
use crate::cv::{DOWNSAMPLE, VideoSource};
use anyhow::{Result, anyhow};
use log::{debug, error, warning};
use opencv::core::{Mat, Size};
use opencv::imgproc;
use std::sync::mpsc::{SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::sync::watch;

/// Per-iteration sleep capping the capture rate and yielding the CPU.
const CAPTURE_INTERVAL: Duration = Duration::from_millis(50);

/// Backoff after a hard device failure, to avoid a hot failure loop.
const FAILURE_BACKOFF: Duration = Duration::from_secs(1);

/// Capture worker loop. Runs on a blocking thread until the running flag
/// drops.
///
/// Each iteration reads one frame, refreshes the FPS estimate, hands the
/// frame to the shared display slot and offers a downsampled copy to the
/// recognition worker. A full recognition channel drops the new copy
/// silently; the capture side never blocks on its consumer.
pub fn run(
    source: Arc<Mutex<Box<dyn VideoSource>>>,
    running: watch::Receiver<bool>,
    display: Arc<Mutex<Option<Mat>>>,
    fps: watch::Sender<f32>,
    frames: SyncSender<Mat>,
) {
    debug!("Capture worker started");
    let mut metrics = FrameMetrics::new();

    while *running.borrow() {
        match read_frame(&source) {
            Ok(Some(frame)) => {
                if let Some(estimate) = metrics.tick() {
                    fps.send_replace(estimate);
                }

                match downsample(&frame) {
                    Ok(small) => offer(&frames, small),
                    Err(e) => error!("Failed to downsample frame: {e}"),
                }

                if let Ok(mut slot) = display.lock() {
                    *slot = Some(frame);
                }
            }
            Ok(None) => warning!("Failed to capture frame from camera"),
            Err(e) => {
                error!("Frame capture error: {e}");
                thread::sleep(FAILURE_BACKOFF);
            }
        }

        thread::sleep(CAPTURE_INTERVAL);
    }

    debug!("Capture worker exiting");
}

fn read_frame(source: &Arc<Mutex<Box<dyn VideoSource>>>) -> Result<Option<Mat>> {
    let mut guard = source
        .lock()
        .map_err(|_| anyhow!("frame source lock poisoned"))?;
    guard.read()
}

fn downsample(frame: &Mat) -> Result<Mat> {
    let mut small = Mat::default();
    imgproc::resize(
        frame,
        &mut small,
        Size::new(0, 0),
        DOWNSAMPLE,
        DOWNSAMPLE,
        imgproc::INTER_AREA,
    )?;
    Ok(small)
}

/// Non-blocking push. A full channel keeps its pending frame; the new one is
/// discarded without logging (backpressure is expected, not an error).
fn offer(frames: &SyncSender<Mat>, small: Mat) {
    match frames.try_send(small) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {}
        Err(TrySendError::Disconnected(_)) => debug!("Recognition channel closed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{CV_8UC3, Scalar};
    use opencv::prelude::*;
    use std::sync::mpsc::sync_channel;

    fn frame(rows: i32, cols: i32) -> Mat {
        Mat::new_rows_cols_with_default(rows, cols, CV_8UC3, Scalar::all(0.0)).unwrap()
    }

    #[test]
    fn full_channel_keeps_pending_frame_and_drops_new_one() {
        let (tx, rx) = sync_channel::<Mat>(1);

        offer(&tx, frame(4, 4));
        offer(&tx, frame(8, 8));

        let pending = rx.try_recv().expect("one frame pending");
        assert_eq!(pending.rows(), 4);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn offer_survives_a_closed_consumer() {
        let (tx, rx) = sync_channel::<Mat>(1);
        drop(rx);
        offer(&tx, frame(2, 2));
    }

    #[test]
    fn downsample_halves_each_axis() {
        let small = downsample(&frame(480, 640)).unwrap();
        assert_eq!((small.rows(), small.cols()), (240, 320));
    }
}
