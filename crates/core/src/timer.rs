//! Frame timing for the main loop.

use std::time::{Duration, Instant};

/// How often [`FrameTimer::tick`] reports an average frame rate.
const REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Tracks per-frame delta time and a rolling frame rate.
#[derive(Debug)]
pub struct FrameTimer {
    start: Instant,
    last_tick: Instant,
    frames: u64,
    window_start: Instant,
    window_frames: u32,
}

impl FrameTimer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            frames: 0,
            window_start: now,
            window_frames: 0,
        }
    }

    /// Seconds since the timer was created.
    pub fn elapsed_secs(&self) -> f32 {
        self.start.elapsed().as_secs_f32()
    }

    /// Total number of ticks so far.
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Advance one frame and return the delta in seconds.
    ///
    /// Every few seconds the average frame rate is logged at debug level.
    pub fn tick(&mut self) -> f32 {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        self.frames += 1;
        self.window_frames += 1;

        let window = now - self.window_start;
        if window >= REPORT_INTERVAL {
            let fps = self.window_frames as f64 / window.as_secs_f64();
            tracing::debug!("{:.1} fps over the last {:.1}s", fps, window.as_secs_f64());
            self.window_start = now;
            self.window_frames = 0;
        }

        delta.as_secs_f32()
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_counts_frames() {
        let mut timer = FrameTimer::new();
        assert_eq!(timer.frame_count(), 0);
        let delta = timer.tick();
        timer.tick();
        assert!(delta >= 0.0);
        assert_eq!(timer.frame_count(), 2);
    }
}
