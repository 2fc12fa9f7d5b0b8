use log::debug;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(1);

/// Rolling frames-per-second estimate over a one-second wall-clock window.
pub struct FrameMetrics {
    window_start: Instant,
    frames_in_window: u32,
    fps: f32,
}

impl FrameMetrics {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    fn starting_at(now: Instant) -> Self {
        FrameMetrics {
            window_start: now,
            frames_in_window: 0,
            fps: 0.0,
        }
    }

    /// Counts one captured frame. Returns the refreshed estimate whenever the
    /// window rolled over.
    pub fn tick(&mut self) -> Option<f32> {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> Option<f32> {
        let mut updated = None;

        let elapsed = now.duration_since(self.window_start);
        if elapsed >= WINDOW {
            self.fps = self.frames_in_window as f32 / elapsed.as_secs_f32();
            self.frames_in_window = 0;
            self.window_start = now;
            debug!("Capture rate: {:.1} FPS", self.fps);
            updated = Some(self.fps);
        }

        self.frames_in_window += 1;
        updated
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_estimate_before_the_window_fills() {
        let t0 = Instant::now();
        let mut metrics = FrameMetrics::starting_at(t0);

        for i in 0..10 {
            assert_eq!(metrics.tick_at(t0 + Duration::from_millis(i * 50)), None);
        }
        assert_eq!(metrics.fps(), 0.0);
    }

    #[test]
    fn estimate_is_frames_over_elapsed_window() {
        let t0 = Instant::now();
        let mut metrics = FrameMetrics::starting_at(t0);

        for i in 0..30 {
            metrics.tick_at(t0 + Duration::from_millis(i * 33));
        }
        let fps = metrics
            .tick_at(t0 + Duration::from_secs(1))
            .expect("window rolled over");

        assert!((fps - 30.0).abs() < 0.01);
        assert_eq!(metrics.fps(), fps);
    }

    #[test]
    fn slow_capture_yields_fractional_rate() {
        let t0 = Instant::now();
        let mut metrics = FrameMetrics::starting_at(t0);

        metrics.tick_at(t0);
        let fps = metrics
            .tick_at(t0 + Duration::from_secs(2))
            .expect("window rolled over");

        assert!((fps - 0.5).abs() < 0.01);
    }
}
