//! Playback clock abstraction.
//!
//! The scheduler never reads wall time directly. Whatever renders audio owns
//! the clock and advances it; everyone else only calls [`PlaybackClock::now`].

use crate::audio::duration_of;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Monotonic time source for playback scheduling.
pub trait PlaybackClock: Send + Sync {
    /// Time elapsed on the playback timeline.
    fn now(&self) -> Duration;
}

/// A shared clock handle.
pub type SharedClock = Arc<dyn PlaybackClock>;

/// A clock that only moves when told to.
///
/// Used to drive the scheduler deterministically in tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock already positioned at `at`.
    pub fn starting_at(at: Duration) -> Self {
        Self { nanos: AtomicU64::new(at.as_nanos() as u64) }
    }

    /// Jump to an absolute position. Moving backwards is ignored.
    pub fn set(&self, at: Duration) {
        self.nanos.fetch_max(at.as_nanos() as u64, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl PlaybackClock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

/// Wall-clock time since construction.
#[derive(Debug, Clone, Copy)]
pub struct WallClock {
    origin: Instant,
}

impl WallClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackClock for WallClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock derived from the number of sample frames an output has rendered.
///
/// This is the device clock: it advances only as fast as the hardware
/// consumes audio, so schedules computed against it stay sample-accurate.
#[derive(Debug)]
pub struct SampleClock {
    frames: AtomicU64,
    sample_rate: u32,
}

impl SampleClock {
    pub fn new(sample_rate: u32) -> Self {
        Self { frames: AtomicU64::new(0), sample_rate }
    }

    /// Record that `frames` more sample frames were rendered.
    pub fn advance_frames(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::AcqRel);
    }

    /// Total frames rendered so far.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl PlaybackClock for SampleClock {
    fn now(&self) -> Duration {
        duration_of(self.frames() as usize, self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_never_moves_backwards() {
        let clock = ManualClock::new();
        clock.set(Duration::from_millis(700));
        clock.set(Duration::from_millis(500));
        assert_eq!(clock.now(), Duration::from_millis(700));
        clock.advance(Duration::from_millis(50));
        assert_eq!(clock.now(), Duration::from_millis(750));
    }

    #[test]
    fn test_sample_clock_tracks_rendered_frames() {
        let clock = SampleClock::new(48_000);
        clock.advance_frames(480);
        clock.advance_frames(480);
        assert_eq!(clock.now(), Duration::from_millis(20));
        assert_eq!(clock.frames(), 960);
    }

    #[test]
    fn test_wall_clock_is_monotonic() {
        let clock = WallClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
