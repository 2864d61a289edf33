//! Health metrics for the frame pipeline
//!
//! One instance per stream, shared between the pull loop and whoever wants
//! to inspect it. All fields use atomic operations for thread-safe access.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

fn now_micros() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_micros() as u64
}

/// Counters for one media stream
pub struct StreamHealth {
    /// Frames handed to the consumer
    frames_delivered: AtomicU64,

    /// Frames dropped because the output pipe was full
    pipe_drops: AtomicU64,

    /// Incomplete or lost pulls retried without delivering anything
    soft_retries: AtomicU64,

    /// Geometry renegotiations requested mid-stream
    renegotiations: AtomicU64,

    /// Total payload bytes delivered
    bytes_delivered: AtomicU64,

    keyframes: AtomicU64,

    /// Unix microseconds of the last delivered frame
    last_frame_time: AtomicU64,
}

impl StreamHealth {
    pub fn new() -> Self {
        Self {
            frames_delivered: AtomicU64::new(0),
            pipe_drops: AtomicU64::new(0),
            soft_retries: AtomicU64::new(0),
            renegotiations: AtomicU64::new(0),
            bytes_delivered: AtomicU64::new(0),
            keyframes: AtomicU64::new(0),
            last_frame_time: AtomicU64::new(now_micros()),
        }
    }

    pub fn record_frame(&self, size: usize, is_keyframe: bool) {
        self.last_frame_time.store(now_micros(), Ordering::Relaxed);
        self.frames_delivered.fetch_add(1, Ordering::Relaxed);
        self.bytes_delivered
            .fetch_add(size as u64, Ordering::Relaxed);
        if is_keyframe {
            self.keyframes.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_pipe_drop(&self) {
        self.pipe_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_soft_retry(&self) {
        self.soft_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_renegotiation(&self) {
        self.renegotiations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered.load(Ordering::Relaxed)
    }

    pub fn pipe_drops(&self) -> u64 {
        self.pipe_drops.load(Ordering::Relaxed)
    }

    pub fn soft_retries(&self) -> u64 {
        self.soft_retries.load(Ordering::Relaxed)
    }

    pub fn renegotiations(&self) -> u64 {
        self.renegotiations.load(Ordering::Relaxed)
    }

    pub fn bytes_delivered(&self) -> u64 {
        self.bytes_delivered.load(Ordering::Relaxed)
    }

    pub fn keyframes(&self) -> u64 {
        self.keyframes.load(Ordering::Relaxed)
    }

    pub fn last_frame_time(&self) -> u64 {
        self.last_frame_time.load(Ordering::Relaxed)
    }

    /// Drop rate relative to frames delivered, as a percentage
    pub fn drop_rate(&self) -> f64 {
        let delivered = self.frames_delivered();
        if delivered == 0 {
            return 0.0;
        }
        (self.pipe_drops() as f64 / delivered as f64) * 100.0
    }

    /// True when no frame was delivered for `threshold`
    pub fn is_stalled(&self, threshold: Duration) -> bool {
        let elapsed = now_micros().saturating_sub(self.last_frame_time());
        elapsed > threshold.as_micros() as u64
    }

    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            frames_delivered: self.frames_delivered(),
            pipe_drops: self.pipe_drops(),
            soft_retries: self.soft_retries(),
            renegotiations: self.renegotiations(),
            bytes_delivered: self.bytes_delivered(),
            keyframes: self.keyframes(),
            drop_rate: self.drop_rate(),
        }
    }
}

impl Default for StreamHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the stream counters
#[derive(Debug, Clone)]
pub struct HealthSummary {
    pub frames_delivered: u64,
    pub pipe_drops: u64,
    pub soft_retries: u64,
    pub renegotiations: u64,
    pub bytes_delivered: u64,
    pub keyframes: u64,
    pub drop_rate: f64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} frames ({} pipe drops, {:.2}%), {} soft retries, {} renegotiations, {} bytes, {} keyframes",
            self.frames_delivered,
            self.pipe_drops,
            self.drop_rate,
            self.soft_retries,
            self.renegotiations,
            self.bytes_delivered,
            self.keyframes
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_counters() {
        let health = StreamHealth::new();

        health.record_frame(1000, false);
        health.record_frame(2000, true);
        health.record_frame(1500, false);

        assert_eq!(health.frames_delivered(), 3);
        assert_eq!(health.bytes_delivered(), 4500);
        assert_eq!(health.keyframes(), 1);
        assert_eq!(health.pipe_drops(), 0);

        health.record_pipe_drop();
        health.record_pipe_drop();

        assert_eq!(health.pipe_drops(), 2);
        assert!(health.drop_rate() > 0.0);
    }

    #[test]
    fn test_stall_detection() {
        let health = StreamHealth::new();
        assert!(!health.is_stalled(Duration::from_secs(1)));

        health.record_frame(1000, false);
        std::thread::sleep(Duration::from_millis(150));
        assert!(health.is_stalled(Duration::from_millis(100)));
    }
}
