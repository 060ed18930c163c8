//! Line buffering and throttled batch delivery shared by the stream parsers.
//!
//! `LineSplitter` turns arbitrary stdout chunks into whole lines.
//! `BatchThrottle` decides when buffered items may be delivered: every batch
//! goes out until `unthrottled` items have been delivered, after that at most
//! one batch per `window`.

use std::time::Duration;
use tokio::time::Instant;

/// Reassembles lines split across chunk boundaries.
#[derive(Debug, Default)]
pub struct LineSplitter {
    partial: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completed, without terminators.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.partial.extend_from_slice(&rest[..pos]);
            lines.push(decode_line(&self.partial));
            self.partial.clear();
            rest = &rest[pos + 1..];
        }
        self.partial.extend_from_slice(rest);

        lines
    }

    /// Take whatever is left after the stream ended without a final newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            return None;
        }
        let line = decode_line(&self.partial);
        self.partial.clear();
        Some(line)
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleConfig {
    /// Items delivered without any rate limit before throttling starts
    pub unthrottled: usize,
    /// Minimum spacing between throttled deliveries
    pub window: Duration,
}

impl ThrottleConfig {
    pub const fn new(unthrottled: usize, window: Duration) -> Self {
        Self { unthrottled, window }
    }
}

#[derive(Debug)]
pub struct BatchThrottle {
    config: ThrottleConfig,
    delivered: usize,
    last_flush: Instant,
}

impl BatchThrottle {
    pub fn new(config: ThrottleConfig, now: Instant) -> Self {
        Self {
            config,
            delivered: 0,
            last_flush: now,
        }
    }

    /// Whether a batch may be delivered at `now`.
    pub fn ready(&self, now: Instant) -> bool {
        self.delivered < self.config.unthrottled
            || now.duration_since(self.last_flush) >= self.config.window
    }

    /// When a held-back batch becomes deliverable.
    pub fn deadline(&self) -> Instant {
        self.last_flush + self.config.window
    }

    /// Record that `count` items were delivered at `now`.
    pub fn delivered(&mut self, count: usize, now: Instant) {
        self.delivered += count;
        self.last_flush = now;
    }

    pub fn total_delivered(&self) -> usize {
        self.delivered
    }
}
