//! Frame rate statistics.

/// Running min/max/average FPS over presented frames.
#[derive(Debug, Clone)]
pub struct FrameStats {
    min_fps: f64,
    max_fps: f64,
    fps_sum: f64,
    samples: u64,
}

impl Default for FrameStats {
    fn default() -> Self {
        Self {
            min_fps: f64::MAX,
            max_fps: 0.0,
            fps_sum: 0.0,
            samples: 0,
        }
    }
}

impl FrameStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one frame that took `dt` seconds. Non-positive durations are skipped.
    pub fn record(&mut self, dt: f64) {
        if dt <= 0.0 {
            return;
        }
        let fps = 1.0 / dt;
        self.min_fps = self.min_fps.min(fps);
        self.max_fps = self.max_fps.max(fps);
        self.fps_sum += fps;
        self.samples += 1;
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn min_fps(&self) -> Option<f64> {
        (self.samples > 0).then_some(self.min_fps)
    }

    pub fn max_fps(&self) -> Option<f64> {
        (self.samples > 0).then_some(self.max_fps)
    }

    pub fn avg_fps(&self) -> Option<f64> {
        (self.samples > 0).then(|| self.fps_sum / self.samples as f64)
    }

    /// Log the summary at info level.
    pub fn log_summary(&self, total_frames: u64) {
        if let (Some(min), Some(max), Some(avg)) = (self.min_fps(), self.max_fps(), self.avg_fps()) {
            tracing::info!("FPS Statistics:");
            tracing::info!("  Min: {:.1}", min);
            tracing::info!("  Max: {:.1}", max);
            tracing::info!("  Avg: {:.1}", avg);
        }
        tracing::info!("  Total frames: {}", total_frames);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_stats() {
        let stats = FrameStats::new();
        assert_eq!(stats.samples(), 0);
        assert_eq!(stats.min_fps(), None);
        assert_eq!(stats.avg_fps(), None);
    }

    #[test]
    fn tracks_extremes_and_mean() {
        let mut stats = FrameStats::new();
        stats.record(0.5); // 2 fps
        stats.record(0.25); // 4 fps
        stats.record(0.1); // 10 fps

        assert_eq!(stats.samples(), 3);
        assert!((stats.min_fps().unwrap() - 2.0).abs() < 1e-9);
        assert!((stats.max_fps().unwrap() - 10.0).abs() < 1e-9);
        assert!((stats.avg_fps().unwrap() - 16.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn ignores_zero_duration() {
        let mut stats = FrameStats::new();
        stats.record(0.0);
        stats.record(-1.0);
        assert_eq!(stats.samples(), 0);
    }
}
