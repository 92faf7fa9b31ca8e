//! Per-interval throughput derived from the reader's running counters.

use std::time::Duration;

use stfcap_core::ReaderStats;

/// Counter deltas over one reporting interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rate {
    pub frames: u64,
    pub dropped: u64,
    pub bytes: u64,
    pub fps: f64,
    pub kib_per_sec: f64,
}

/// Remembers the previous snapshot so each tick reports only what changed.
#[derive(Debug, Default)]
pub struct Throughput {
    last: ReaderStats,
}

impl Throughput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rate since the previous call. A reset of the counters (reader
    /// restarted) starts over from zero.
    pub fn tick(&mut self, now: &ReaderStats, elapsed: Duration) -> Rate {
        if now.frames_delivered < self.last.frames_delivered
            || now.frames_dropped < self.last.frames_dropped
        {
            self.last = ReaderStats::default();
        }
        let frames = now.frames_delivered - self.last.frames_delivered;
        let dropped = now.frames_dropped - self.last.frames_dropped;
        let bytes = now.bytes_delivered.saturating_sub(self.last.bytes_delivered);
        self.last = now.clone();

        let secs = elapsed.as_secs_f64().max(f64::EPSILON);
        Rate {
            frames,
            dropped,
            bytes,
            fps: frames as f64 / secs,
            kib_per_sec: bytes as f64 / 1024.0 / secs,
        }
    }
}
