use crate::api::PresenceEvent;
use crate::catalog::ReferenceIdentity;
use crate::cv::engine::FaceEngine;
use crate::cv::{FrameSource, RecognitionResult, VideoSource, capture, recognize};
use crate::presence::PresenceSet;
use anyhow::{Context, Result, bail};
use log::{error, info};
use opencv::core::Mat;
use serde::Serialize;
use std::sync::mpsc::sync_channel;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::watch;
use tokio::task::{self, JoinHandle};

/// Lifecycle of the monitoring pipeline. Workers never see this directly;
/// they only observe a boolean running flag derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Initializing,
    Running,
    Stopped,
}

/// Point-in-time pipeline status, safe to poll frequently. All-zero when the
/// pipeline has never started.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSnapshot {
    pub fps: f32,
    pub faces_detected: usize,
    pub present_count: usize,
    pub recognition_results: Vec<RecognitionResult>,
    pub recent_present: Vec<String>,
}

fn open_camera() -> Result<Box<dyn VideoSource>> {
    Ok(Box::new(FrameSource::open()?))
}

struct ActivePipeline {
    running: watch::Sender<bool>,
    source: Arc<Mutex<Box<dyn VideoSource>>>,
    fps: watch::Receiver<f32>,
    results: watch::Receiver<Vec<RecognitionResult>>,
    capture: JoinHandle<()>,
    recognition: JoinHandle<()>,
}

/// Owns the camera handle and both workers; coordinates their race-free
/// start/stop. Shared as `Arc<SessionController>` and injected into the
/// stream server rather than living in process globals.
///
/// The presence set survives stop/start cycles; FPS and results reset on
/// every start.
pub struct SessionController {
    state: Mutex<PipelineState>,
    display: Arc<Mutex<Option<Mat>>>,
    presence: Arc<PresenceSet>,
    active: Mutex<Option<ActivePipeline>>,
    events: Option<UnboundedSender<PresenceEvent>>,
}

impl SessionController {
    pub fn new(events: Option<UnboundedSender<PresenceEvent>>) -> Self {
        Self {
            state: Mutex::new(PipelineState::Idle),
            display: Arc::new(Mutex::new(None)),
            presence: Arc::new(PresenceSet::new()),
            active: Mutex::new(None),
            events,
        }
    }

    pub fn state(&self) -> PipelineState {
        *self.state.lock().expect("state lock poisoned")
    }

    pub fn is_running(&self) -> bool {
        self.state() == PipelineState::Running
    }

    pub fn presence(&self) -> &PresenceSet {
        &self.presence
    }

    /// Opens the camera and spawns both workers bound to the given catalog.
    /// Rejects a second start and surfaces device failures to the caller.
    pub async fn start(
        &self,
        catalog: Vec<ReferenceIdentity>,
        engine: Box<dyn FaceEngine>,
    ) -> Result<()> {
        self.start_with(catalog, engine, open_camera).await
    }

    async fn start_with(
        &self,
        catalog: Vec<ReferenceIdentity>,
        engine: Box<dyn FaceEngine>,
        open_source: fn() -> Result<Box<dyn VideoSource>>,
    ) -> Result<()> {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            if *state != PipelineState::Idle {
                bail!("attendance session already running");
            }
            *state = PipelineState::Initializing;
        }

        match self.spawn_pipeline(catalog, engine, open_source).await {
            Ok(()) => {
                *self.state.lock().expect("state lock poisoned") = PipelineState::Running;
                info!("Monitoring session running");
                Ok(())
            }
            Err(e) => {
                *self.state.lock().expect("state lock poisoned") = PipelineState::Idle;
                Err(e)
            }
        }
    }

    async fn spawn_pipeline(
        &self,
        catalog: Vec<ReferenceIdentity>,
        engine: Box<dyn FaceEngine>,
        open_source: fn() -> Result<Box<dyn VideoSource>>,
    ) -> Result<()> {
        if catalog.is_empty() {
            bail!("no reference data for the selected scope");
        }

        let source = task::spawn_blocking(open_source)
            .await
            .context("camera probe task failed")?
            .context("starting monitoring session")?;
        let source = Arc::new(Mutex::new(source));

        let (running_tx, running_rx) = watch::channel(true);
        let (fps_tx, fps_rx) = watch::channel(0.0f32);
        let (results_tx, results_rx) = watch::channel(Vec::new());
        let (frame_tx, frame_rx) = sync_channel::<Mat>(1);

        let capture_handle = task::spawn_blocking({
            let source = source.clone();
            let running = running_rx.clone();
            let display = self.display.clone();
            move || capture::run(source, running, display, fps_tx, frame_tx)
        });

        let recognition_handle = task::spawn_blocking({
            let running = running_rx;
            let presence = self.presence.clone();
            let events = self.events.clone();
            move || recognize::run(frame_rx, running, engine, catalog, results_tx, presence, events)
        });

        let mut active = self.active.lock().expect("active lock poisoned");
        *active = Some(ActivePipeline {
            running: running_tx,
            source,
            fps: fps_rx,
            results: results_rx,
            capture: capture_handle,
            recognition: recognition_handle,
        });

        Ok(())
    }

    /// Stops the workers, releases the camera exactly once and drains the
    /// frame channel. Safe to call before any start and idempotent.
    ///
    /// A stop racing a concurrent start that is still `Initializing` returns
    /// without effect; that start proceeds to `Running`.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            if *state != PipelineState::Running {
                return Ok(());
            }
            *state = PipelineState::Stopped;
        }

        let pipeline = self.active.lock().expect("active lock poisoned").take();

        if let Some(pipeline) = pipeline {
            // Workers observe the flag at their next loop check or timeout.
            pipeline.running.send(false).ok();

            if let Err(e) = pipeline.capture.await {
                error!("Capture worker did not exit cleanly: {e}");
            }
            if let Err(e) = pipeline.recognition.await {
                error!("Recognition worker did not exit cleanly: {e}");
            }

            if let Ok(mut source) = pipeline.source.lock() {
                source.close();
            }
        }

        if let Ok(mut slot) = self.display.lock() {
            *slot = None;
        }

        *self.state.lock().expect("state lock poisoned") = PipelineState::Idle;
        info!("Monitoring session stopped");
        Ok(())
    }

    /// Copy of the latest raw frame, taken under a short-lived lock.
    pub fn latest_frame(&self) -> Option<Mat> {
        self.display.lock().ok()?.clone()
    }

    /// The most recent recognition cycle's full result list.
    pub fn latest_results(&self) -> Vec<RecognitionResult> {
        let active = self.active.lock().expect("active lock poisoned");
        active
            .as_ref()
            .map(|p| p.results.borrow().clone())
            .unwrap_or_default()
    }

    pub fn fps(&self) -> f32 {
        let active = self.active.lock().expect("active lock poisoned");
        active.as_ref().map(|p| *p.fps.borrow()).unwrap_or(0.0)
    }

    pub fn status(&self) -> StatusSnapshot {
        let (fps, recognition_results) = {
            let active = self.active.lock().expect("active lock poisoned");
            match active.as_ref() {
                Some(p) => (*p.fps.borrow(), p.results.borrow().clone()),
                None => (0.0, Vec::new()),
            }
        };

        StatusSnapshot {
            fps,
            faces_detected: recognition_results.len(),
            present_count: self.presence.len(),
            recognition_results,
            recent_present: self.presence.recent(),
        }
    }
}
