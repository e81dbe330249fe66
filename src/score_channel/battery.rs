//! Low-battery reporting.
//!
//! Battery levels are watched while the stream page is open. The first level
//! at or below the threshold sends one `low_battery` event; the latch re-arms
//! only after the level climbs back above it.

use anyhow::{Context, Result};
use serde::Serialize;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

use super::channel::ChannelEmitter;

pub const LOW_BATTERY_THRESHOLD: u8 = 30;

/// `level * 100 / scale`, as the platform battery broadcast reports it.
pub fn battery_percent(level: i32, scale: i32) -> Option<u8> {
    if level < 0 || scale <= 0 {
        return None;
    }
    let percent = (i64::from(level) * 100 / i64::from(scale)).clamp(0, 100);
    u8::try_from(percent).ok()
}

#[derive(Debug, Clone)]
pub struct LowBatteryLatch {
    threshold: u8,
    notified: bool,
}

impl LowBatteryLatch {
    pub fn new(threshold: u8) -> Self {
        Self {
            threshold,
            notified: false,
        }
    }

    /// True exactly when a report should go out for this reading.
    pub fn observe(&mut self, percent: u8) -> bool {
        if percent <= self.threshold {
            if !self.notified {
                self.notified = true;
                return true;
            }
        } else if self.notified {
            self.notified = false;
            debug!("[Battery] Level restored to {}%", percent);
        }
        false
    }

    pub fn is_latched(&self) -> bool {
        self.notified
    }
}

impl Default for LowBatteryLatch {
    fn default() -> Self {
        Self::new(LOW_BATTERY_THRESHOLD)
    }
}

/// `low_battery` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LowBatteryReport {
    #[serde(rename = "matchId")]
    pub match_id: String,
    pub battery: u8,
    pub token: String,
}

/// Sends `low_battery` through the score channel. Needs an auth token; the
/// caller does not start one without it.
pub struct BatteryReporter {
    emitter: ChannelEmitter,
    match_id: String,
    token: String,
    latch: LowBatteryLatch,
}

impl BatteryReporter {
    pub fn new(emitter: ChannelEmitter, match_id: impl Into<String>, token: impl Into<String>, threshold: u8) -> Self {
        Self {
            emitter,
            match_id: match_id.into(),
            token: token.into(),
            latch: LowBatteryLatch::new(threshold),
        }
    }

    /// Returns true when a report was queued.
    pub fn observe(&mut self, percent: u8) -> Result<bool> {
        if !self.latch.observe(percent) {
            return Ok(false);
        }

        let report = LowBatteryReport {
            match_id: self.match_id.clone(),
            battery: percent,
            token: self.token.clone(),
        };
        let payload = serde_json::to_value(&report).context("Failed to encode low_battery")?;
        self.emitter.emit("low_battery", payload)?;
        info!("[Battery] Low battery reported: {}%", percent);
        Ok(true)
    }

    /// Consumes battery readings until the stream ends or the channel closes.
    pub async fn run<S>(mut self, mut levels: S)
    where
        S: Stream<Item = u8> + Unpin,
    {
        while let Some(percent) = levels.next().await {
            if let Err(e) = self.observe(percent) {
                warn!("[Battery] Stopping reports: {:#}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_from_level_and_scale() {
        assert_eq!(battery_percent(45, 100), Some(45));
        assert_eq!(battery_percent(3, 10), Some(30));
        assert_eq!(battery_percent(150, 255), Some(58));
        assert_eq!(battery_percent(-1, 100), None);
        assert_eq!(battery_percent(50, 0), None);
    }

    #[test]
    fn latch_fires_once_until_recovery() {
        let mut latch = LowBatteryLatch::default();
        let fired: Vec<bool> = [50, 30, 25, 20, 31, 29].iter().map(|pct| latch.observe(*pct)).collect();
        assert_eq!(fired, vec![false, true, false, false, false, true]);
        assert!(latch.is_latched());
    }

    #[tokio::test]
    async fn reporter_emits_payload_with_token() {
        let (emitter, mut queue) = ChannelEmitter::detached();
        let reporter = BatteryReporter::new(emitter, "m-1", "jwt", LOW_BATTERY_THRESHOLD);

        reporter.run(tokio_stream::iter(vec![80, 30, 10, 40, 15])).await;

        let first = queue.recv().await.unwrap();
        assert_eq!(first.name, "low_battery");
        assert_eq!(
            first.payload,
            serde_json::json!({ "matchId": "m-1", "battery": 30, "token": "jwt" })
        );
        assert_eq!(queue.recv().await.unwrap().payload["battery"], 15);
        assert!(queue.try_recv().is_err());
    }
}
