use crate::api::PresenceEvent;
use crate::catalog::{self, ReferenceIdentity};
use crate::cv::RecognitionResult;
use crate::cv::engine::{FaceEngine, FaceObservation};
use crate::presence::PresenceSet;
use anyhow::Result;
use log::{debug, error};
use opencv::core::Mat;
use opencv::imgproc;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::watch;

/// Matches below or at this confidence never touch the presence set.
pub const PRESENCE_CONFIDENCE_FLOOR: f64 = 0.4;

/// Bounded wait on the frame channel; doubles as the cancellation checkpoint.
const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Inverse of the capture-side downsample factor.
const UPSCALE: i32 = 2;

/// Recognition worker loop. Runs on a blocking thread until the running flag
/// drops or the frame channel closes.
///
/// Every cycle replaces the shared result list wholesale. Per-cycle failures
/// are logged and skipped, leaving the previous results in place.
pub fn run(
    frames: Receiver<Mat>,
    running: watch::Receiver<bool>,
    mut engine: Box<dyn FaceEngine>,
    catalog: Vec<ReferenceIdentity>,
    results: watch::Sender<Vec<RecognitionResult>>,
    presence: Arc<PresenceSet>,
    events: Option<UnboundedSender<PresenceEvent>>,
) {
    debug!(
        "Recognition worker started ({} reference identities)",
        catalog.len()
    );

    while *running.borrow() {
        let frame = match frames.recv_timeout(RECV_TIMEOUT) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        match process(engine.as_mut(), &catalog, &frame) {
            Ok(cycle) => {
                for result in &cycle {
                    if result.is_unknown() || result.confidence <= PRESENCE_CONFIDENCE_FLOOR {
                        continue;
                    }

                    if presence.register(&result.label) {
                        debug!(
                            "Marked {} present (confidence {:.2})",
                            result.label, result.confidence
                        );
                        if let Some(tx) = &events {
                            let _ = tx.send(PresenceEvent::now(&result.label, result.confidence));
                        }
                    }
                }

                results.send_replace(cycle);
            }
            Err(e) => error!("Recognition processing error: {e}"),
        }
    }

    debug!("Recognition worker exiting");
}

fn process(
    engine: &mut dyn FaceEngine,
    catalog: &[ReferenceIdentity],
    frame: &Mat,
) -> Result<Vec<RecognitionResult>> {
    let mut rgb = Mat::default();
    imgproc::cvt_color(frame, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;

    let observations = engine.observe(&rgb)?;
    Ok(observations
        .iter()
        .map(|obs| to_result(obs, catalog))
        .collect())
}

/// Classifies one observation and maps its box back into full-frame space.
fn to_result(obs: &FaceObservation, catalog: &[ReferenceIdentity]) -> RecognitionResult {
    let (label, confidence) = catalog::classify(catalog, &obs.embedding);
    RecognitionResult {
        label,
        confidence,
        bbox: obs.bbox.scaled(UPSCALE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cv::BBox;
    use opencv::core::{CV_8UC3, Scalar};
    use std::sync::mpsc::sync_channel;
    use std::thread;
    use std::time::Instant;

    struct StubEngine {
        observations: Vec<FaceObservation>,
    }

    impl FaceEngine for StubEngine {
        fn observe(&mut self, _rgb: &Mat) -> Result<Vec<FaceObservation>> {
            Ok(self.observations.clone())
        }
    }

    fn reference(label: &str, value: f64) -> ReferenceIdentity {
        ReferenceIdentity {
            label: label.to_owned(),
            embeddings: vec![vec![value]],
        }
    }

    fn observation(value: f64) -> FaceObservation {
        FaceObservation {
            bbox: BBox::new(10, 40, 30, 20),
            embedding: vec![value],
        }
    }

    fn frame() -> Mat {
        Mat::new_rows_cols_with_default(48, 64, CV_8UC3, Scalar::all(0.0)).unwrap()
    }

    #[test]
    fn result_boxes_are_twice_the_observed_coordinates() {
        let catalog = vec![reference("A", 0.0)];
        let result = to_result(&observation(0.2), &catalog);

        assert_eq!(result.label, "A");
        assert!((result.confidence - 0.8).abs() < 1e-9);
        assert_eq!(result.bbox, BBox::new(20, 80, 60, 40));
    }

    #[test]
    fn distant_observation_maps_to_unknown() {
        let catalog = vec![reference("A", 0.0)];
        let result = to_result(&observation(0.5), &catalog);

        assert!(result.is_unknown());
        assert_eq!(result.confidence, 0.0);
    }

    fn run_worker_once(
        observations: Vec<FaceObservation>,
        catalog: Vec<ReferenceIdentity>,
    ) -> (Vec<RecognitionResult>, Arc<PresenceSet>) {
        let (frame_tx, frame_rx) = sync_channel::<Mat>(1);
        let (running_tx, running_rx) = tokio::sync::watch::channel(true);
        let (results_tx, results_rx) = tokio::sync::watch::channel(Vec::new());
        let presence = Arc::new(PresenceSet::new());

        let worker_presence = presence.clone();
        let engine = Box::new(StubEngine { observations });
        let handle = thread::spawn(move || {
            run(
                frame_rx,
                running_rx,
                engine,
                catalog,
                results_tx,
                worker_presence,
                None,
            )
        });

        frame_tx.send(frame()).unwrap();
        drop(frame_tx);

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if !results_rx.borrow().is_empty() || Instant::now() > deadline {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }

        running_tx.send(false).ok();
        handle.join().unwrap();

        let results = results_rx.borrow().clone();
        (results, presence)
    }

    #[test]
    fn worker_publishes_results_and_registers_presence() {
        let (results, presence) = run_worker_once(vec![observation(0.2)], vec![reference("A", 0.0)]);

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].label, "A");
        assert!(presence.contains("A"));
        assert_eq!(presence.recent(), vec!["A".to_owned()]);
    }

    #[test]
    fn unknown_faces_never_enter_the_presence_set() {
        let (results, presence) = run_worker_once(vec![observation(0.5)], vec![reference("A", 0.0)]);

        assert_eq!(results.len(), 1);
        assert!(results[0].is_unknown());
        assert!(presence.is_empty());
    }
}
