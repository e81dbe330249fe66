//! Per-session counters.
//!
//! Thread-safe counters for overlay work, adaptation actions, transport
//! failures and score traffic. Clones share the same counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Aggregated counters for one streaming session.
#[derive(Clone, Debug)]
pub struct SessionMetrics {
    started_at: DateTime<Utc>,
    overlay_renders: Arc<AtomicU64>,
    overlay_skips: Arc<AtomicU64>,
    score_updates: Arc<AtomicU64>,
    bitrate_updates: Arc<AtomicU64>,
    soft_restarts: Arc<AtomicU64>,
    transport_failures: Arc<AtomicU64>,
}

/// Point-in-time copy of [`SessionMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub uptime_secs: u64,
    pub overlay_renders: u64,
    pub overlay_skips: u64,
    pub score_updates: u64,
    pub bitrate_updates: u64,
    pub soft_restarts: u64,
    pub transport_failures: u64,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            overlay_renders: Arc::default(),
            overlay_skips: Arc::default(),
            score_updates: Arc::default(),
            bitrate_updates: Arc::default(),
            soft_restarts: Arc::default(),
            transport_failures: Arc::default(),
        }
    }

    pub fn record_overlay(&self, rendered: bool) {
        if rendered {
            self.overlay_renders.fetch_add(1, Ordering::Relaxed);
        } else {
            self.overlay_skips.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_score_update(&self) {
        self.score_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bitrate_update(&self) {
        self.bitrate_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_soft_restart(&self) {
        self.soft_restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transport_failure(&self) {
        self.transport_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn snapshot(&self) -> SessionStats {
        let uptime_secs = (Utc::now() - self.started_at).num_seconds().max(0) as u64;
        SessionStats {
            uptime_secs,
            overlay_renders: self.overlay_renders.load(Ordering::Relaxed),
            overlay_skips: self.overlay_skips.load(Ordering::Relaxed),
            score_updates: self.score_updates.load(Ordering::Relaxed),
            bitrate_updates: self.bitrate_updates.load(Ordering::Relaxed),
            soft_restarts: self.soft_restarts.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new()
    }
}
