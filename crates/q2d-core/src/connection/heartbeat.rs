//! Ping/pong liveness tracking for the device link.
//!
//! One probe is outstanding at a time. Each tick either sends a fresh ping
//! (the previous one was answered) or declares the peer dead (it was not).

use std::time::{Duration, Instant};

/// What the connection should do on a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Peer answered the previous ping; send another.
    SendPing,
    /// No pong since the previous ping; terminate the connection.
    Expired,
}

/// Liveness flag plus round-trip bookkeeping for one connection.
#[derive(Debug)]
pub struct HeartbeatTracker {
    /// Whether a pong arrived since the last ping.
    alive: bool,
    /// When the outstanding ping was sent.
    ping_sent_at: Option<Instant>,
    /// Pings sent on this connection.
    pings_sent: u64,
}

impl Default for HeartbeatTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatTracker {
    /// A freshly connected peer counts as alive.
    pub fn new() -> Self {
        Self {
            alive: true,
            ping_sent_at: None,
            pings_sent: 0,
        }
    }

    /// Advance on a timer tick.
    pub fn on_tick(&mut self) -> TickOutcome {
        if !self.alive {
            return TickOutcome::Expired;
        }
        self.alive = false;
        self.ping_sent_at = Some(Instant::now());
        self.pings_sent += 1;
        TickOutcome::SendPing
    }

    /// Record a pong from the peer. Returns the round-trip time when a ping
    /// was outstanding.
    pub fn on_pong(&mut self) -> Option<Duration> {
        self.alive = true;
        self.ping_sent_at.take().map(|sent| sent.elapsed())
    }

    pub fn pings_sent(&self) -> u64 {
        self.pings_sent
    }
}
