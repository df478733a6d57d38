//! Reconnection handling for device clients.
//!
//! Retries are unbounded and use a constant delay: no exponential backoff,
//! no jitter, no cap. The device has nothing to resync on reconnect, since
//! the server only ever pushes the latest command.

use std::time::{Duration, Instant};

/// Reconnection handler state machine.
#[derive(Debug)]
pub struct ReconnectionHandler {
    /// Current attempt number (1-indexed once started).
    current_attempt: u32,
    /// Delay between attempts.
    delay: Duration,
    /// When the current reconnection cycle started.
    started_at: Option<Instant>,
}

impl ReconnectionHandler {
    /// Create a handler that retries forever, waiting `delay` between
    /// attempts.
    pub fn new(delay: Duration) -> Self {
        Self {
            current_attempt: 0,
            delay,
            started_at: None,
        }
    }

    /// Start a reconnection cycle after a disconnect.
    pub fn start(&mut self) {
        self.current_attempt = 0;
        self.started_at = Some(Instant::now());
    }

    /// Get the delay before the next attempt and count the attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.current_attempt = self.current_attempt.saturating_add(1);
        self.delay
    }

    /// Get the current attempt number.
    pub fn attempt(&self) -> u32 {
        self.current_attempt
    }

    /// Whether a reconnection cycle is in progress.
    pub fn is_active(&self) -> bool {
        self.started_at.is_some()
    }

    /// Get elapsed time since the cycle started.
    pub fn elapsed(&self) -> Duration {
        self.started_at
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    /// Reset after a successful connection.
    pub fn reset(&mut self) {
        self.current_attempt = 0;
        self.started_at = None;
    }
}

// =============================================================================
// Tests
// =============================================================================
