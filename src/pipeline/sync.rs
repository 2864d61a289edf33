//! A/V synchronization engine
//!
//! The camera clocks video and audio independently, so the two pull loops
//! drift against wall clock and against each other. The engine is a pure
//! decision function over shared clock state: each observed timestamp
//! yields a list of [`SyncAction`]s for the pipeline to execute. Small
//! drift is absorbed by pacing debt (cheap), large drift forces a buffer
//! clear (disruptive), with a proportional audio flush in between.

use std::sync::Mutex;
use std::time::Duration;

/// Timestamps below this are firmware that never synchronized its clock;
/// they carry no usable drift information.
pub const BOGUS_EPOCH: f64 = 1_591_069_888.0;

/// Drift beyond this forces a full local buffer clear
const CLEAR_THRESHOLD: f64 = 5.0;
/// Drift beyond this flushes the audio pipe proportionally
const FLUSH_THRESHOLD: f64 = 1.0;

/// Corrective step requested by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum SyncAction {
    /// Re-sync the camera clock and drop everything buffered locally
    ClearBuffer,
    /// Discard roughly `gap` seconds worth of audio from the pipe
    FlushAudio { gap: f64 },
    /// Pause the audio loop so video can catch up
    Hold(Duration),
}

#[derive(Debug, Default)]
struct ClockState {
    /// Wall-clock timestamp of the last accepted video frame, unix seconds.
    /// Monotonic non-decreasing except on an explicit buffer clear.
    frame_ts: f64,
    /// Pacing debt in seconds; always >= 0
    debt: f64,
}

/// Shared drift state for one session
///
/// One video task and one audio task feed it concurrently; all methods
/// take wall-clock time as an argument so the decisions stay deterministic
/// under test.
#[derive(Debug, Default)]
pub struct SyncClock {
    state: Mutex<ClockState>,
}

impl SyncClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the last-frame timestamp to "now" (stream start, buffer clear)
    pub fn mark(&self, now: f64) {
        self.state.lock().unwrap().frame_ts = now;
    }

    pub fn last_frame_ts(&self) -> f64 {
        self.state.lock().unwrap().frame_ts
    }

    pub fn debt(&self) -> f64 {
        self.state.lock().unwrap().debt
    }

    /// Seconds since the last accepted video frame
    pub fn since_last_frame(&self, now: f64) -> f64 {
        (now - self.state.lock().unwrap().frame_ts).max(0.0)
    }

    /// Fold a video timestamp into the clock and decide corrections.
    ///
    /// `gap` is how far the frame lags wall clock. Beyond 5s the local
    /// buffer is cleared outright; beyond 1s the audio pipe is flushed
    /// proportionally; any positive gap becomes pacing debt so the next
    /// iterations stop sleeping it off.
    pub fn observe_video(&self, timestamp: f64, now: f64) -> Vec<SyncAction> {
        let mut state = self.state.lock().unwrap();

        if timestamp < BOGUS_EPOCH {
            state.frame_ts = now;
            return Vec::new();
        }

        state.frame_ts = timestamp;
        let gap = now - timestamp;

        let mut actions = Vec::new();
        if gap > CLEAR_THRESHOLD {
            actions.push(SyncAction::ClearBuffer);
        }
        if gap > FLUSH_THRESHOLD {
            actions.push(SyncAction::FlushAudio { gap });
        }
        if gap > 0.0 {
            state.debt += gap;
        }
        actions
    }

    /// Fold an audio timestamp in; the reference here is the last video
    /// frame, not wall clock, since the two streams drift against each
    /// other.
    pub fn observe_audio(&self, timestamp: f64) -> Vec<SyncAction> {
        let mut state = self.state.lock().unwrap();

        if timestamp < BOGUS_EPOCH {
            return Vec::new();
        }

        let gap = timestamp - state.frame_ts;

        let mut actions = Vec::new();
        if gap.abs() > CLEAR_THRESHOLD {
            actions.push(SyncAction::ClearBuffer);
        }
        if gap < -FLUSH_THRESHOLD {
            // Audio trailing video: drop the stale part of the pipe
            actions.push(SyncAction::FlushAudio { gap });
        }
        if gap > 0.0 {
            state.debt += gap;
        }
        if gap > FLUSH_THRESHOLD {
            // Audio ahead of video: let video catch up
            actions.push(SyncAction::Hold(Duration::from_secs_f64(gap / 2.0)));
        }
        actions
    }

    /// Pacing delay for the next video pull.
    ///
    /// Targets 95% of the nominal frame period, discounted by the time
    /// already spent since the last frame and by any accumulated debt.
    /// Debt decays by one target period per application. The result is
    /// clamped to a quarter period so the loop keeps polling, and never
    /// exceeds the period itself.
    pub fn pacing_delay(&self, period: f64, now: f64) -> Duration {
        let mut state = self.state.lock().unwrap();

        if state.frame_ts == 0.0 {
            return Duration::from_millis(10);
        }

        let target = period * 0.95;
        let mut elapsed = (now - state.frame_ts).max(0.0);
        if state.debt > 0.0 {
            elapsed += state.debt;
            state.debt = (state.debt - target).max(0.0);
        }

        Duration::from_secs_f64((target - elapsed).max(target / 4.0))
    }
}
