//! Gapless playback scheduling with barge-in support.
//!
//! [`PlaybackScheduler`] turns a stream of decoded frames arriving at
//! arbitrary times into back-to-back playback on a [`PlaybackOutput`]:
//!
//! ```text
//!   arrival:   f1 ──┐    f2 ─┐          f3 ─────┐
//!   timeline:  |====f1====|====f2====|====f3====|
//!              ^ max(now, next_free_slot)
//! ```
//!
//! The next free slot is advanced when a frame is enqueued, not when it starts
//! playing, so frames that arrive together are serialized in arrival order
//! no matter how the network jitters.

use crate::audio::{AudioFormat, AudioFrame};
use crate::clock::SharedClock;
use crate::error::{RealtimeError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Identifier of a scheduled playback unit, unique per scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(u64);

impl UnitId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn from_raw(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit-{}", self.0)
    }
}

/// Called by an output exactly once when a unit finishes playing naturally.
///
/// Stopped units never fire their hook.
pub type CompletionHook = Box<dyn FnOnce() + Send + 'static>;

/// Receives the id of every unit that finished naturally.
pub type FinishNotifier = Arc<dyn Fn(UnitId) + Send + Sync>;

/// An audio sink that can start buffers at precise times on its own clock.
pub trait PlaybackOutput: Send {
    /// The clock this output renders against.
    fn clock(&self) -> SharedClock;

    /// Schedule `frame` to begin at `start_at` on [`Self::clock`].
    fn schedule(
        &mut self,
        id: UnitId,
        frame: AudioFrame,
        start_at: Duration,
        on_finished: CompletionHook,
    ) -> Result<()>;

    /// Stop a unit whether it is playing or only scheduled.
    ///
    /// Unknown or already-finished ids are ignored.
    fn stop(&mut self, id: UnitId);

    /// Release the underlying device. Idempotent.
    fn close(&mut self);
}

/// A boxed output for dynamic dispatch.
pub type BoxedOutput = Box<dyn PlaybackOutput>;

/// A factory for playback outputs.
#[async_trait]
pub trait PlaybackDevice: Send + Sync {
    /// Acquire the speaker for audio of the given format.
    async fn open(&self, format: AudioFormat) -> Result<BoxedOutput>;
}

/// Receipt returned by [`PlaybackScheduler::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledUnit {
    /// Unit identifier.
    pub id: UnitId,
    /// Start time on the playback clock.
    pub start_at: Duration,
    /// Playback duration.
    pub duration: Duration,
}

impl ScheduledUnit {
    /// Time the unit stops playing.
    pub fn end_at(&self) -> Duration {
        self.start_at + self.duration
    }
}

/// A frame owned by the scheduler from enqueue until it finishes or is flushed.
#[derive(Debug)]
struct PlaybackUnit {
    frame: AudioFrame,
    start_at: Duration,
}

impl PlaybackUnit {
    fn end_at(&self) -> Duration {
        self.start_at + self.frame.duration()
    }
}

/// Schedules decoded frames for gapless playback.
pub struct PlaybackScheduler {
    output: Option<BoxedOutput>,
    clock: SharedClock,
    next_free_slot: Duration,
    active: BTreeMap<UnitId, PlaybackUnit>,
    next_id: u64,
    notifier: FinishNotifier,
}

impl PlaybackScheduler {
    /// Create a scheduler over `output`.
    ///
    /// `notifier` receives the id of each unit that finishes naturally; the
    /// owner is expected to feed it back through [`Self::complete`].
    pub fn new(output: BoxedOutput, notifier: FinishNotifier) -> Self {
        let clock = output.clock();
        let next_free_slot = clock.now();
        Self {
            output: Some(output),
            clock,
            next_free_slot,
            active: BTreeMap::new(),
            next_id: 0,
            notifier,
        }
    }

    /// Schedule `frame` right after everything already queued.
    ///
    /// Empty frames are accepted but never reach the output.
    pub fn enqueue(&mut self, frame: AudioFrame) -> Result<ScheduledUnit> {
        let output = self.output.as_mut().ok_or(RealtimeError::SessionClosed)?;

        let now = self.clock.now();
        let start_at = now.max(self.next_free_slot);
        let duration = frame.duration();

        self.next_id += 1;
        let id = UnitId(self.next_id);
        let receipt = ScheduledUnit { id, start_at, duration };

        if frame.is_empty() {
            return Ok(receipt);
        }

        let notify = Arc::clone(&self.notifier);
        output.schedule(id, frame.clone(), start_at, Box::new(move || notify(id)))?;

        self.next_free_slot = start_at + duration;
        self.active.insert(id, PlaybackUnit { frame, start_at });

        tracing::trace!(
            unit = %id,
            start_ms = start_at.as_secs_f64() * 1000.0,
            duration_ms = duration.as_secs_f64() * 1000.0,
            lag_ms = (start_at - now).as_secs_f64() * 1000.0,
            "Scheduled playback unit"
        );
        Ok(receipt)
    }

    /// Remove a unit that finished playing.
    ///
    /// Returns `false` for ids that are not active (already flushed or
    /// completed), which is not an error.
    pub fn complete(&mut self, id: UnitId) -> bool {
        self.active.remove(&id).is_some()
    }

    /// Stop everything playing or queued and rewind the next free slot to now.
    ///
    /// Returns the number of units that were stopped.
    pub fn flush(&mut self) -> usize {
        let stopped = self.active.len();
        if let Some(output) = self.output.as_mut() {
            for id in self.active.keys() {
                output.stop(*id);
            }
        }
        self.active.clear();
        self.next_free_slot = self.clock.now();

        if stopped > 0 {
            tracing::debug!(stopped, "Flushed playback queue");
        }
        stopped
    }

    /// Flush and release the output. Idempotent.
    pub fn close(&mut self) {
        self.flush();
        if let Some(mut output) = self.output.take() {
            output.close();
            tracing::debug!("Playback output released");
        }
    }

    /// Number of units playing or waiting to play.
    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Whether any unit is playing or queued.
    pub fn is_busy(&self) -> bool {
        !self.active.is_empty()
    }

    /// Audio still queued beyond the current clock position.
    pub fn queued_duration(&self) -> Duration {
        let now = self.clock.now();
        self.active.values().map(|u| u.end_at()).max().map(|end| end.saturating_sub(now)).unwrap_or_default()
    }

    /// Sample count of everything still owned by the scheduler.
    pub fn queued_samples(&self) -> usize {
        self.active.values().map(|u| u.frame.samples().len()).sum()
    }

    /// Start time the next enqueued frame would get if the clock did not move.
    pub fn next_free_slot(&self) -> Duration {
        self.next_free_slot
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn is_closed(&self) -> bool {
        self.output.is_none()
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for PlaybackScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackScheduler")
            .field("next_free_slot", &self.next_free_slot)
            .field("active", &self.active.len())
            .field("closed", &self.output.is_none())
            .finish()
    }
}
