//! Bitrate adaptation.
//!
//! [`AdaptationPolicy`] decides, for the current profile and a fresh network
//! classification, between doing nothing, a live bitrate update and a soft
//! restart at the low tier. [`BitrateAdaptationMonitor`] drives the policy from
//! connectivity events while a stream is live and forwards decisions to the
//! session through its control link; it never touches the encoder itself.

use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::model::StreamVideoProfile;
use crate::network::{ConnectivityEvent, NetworkCapabilities, NetworkQuality, NetworkQualityEstimator};
use crate::streaming::ControlLink;

/// Classifications below this bitrate force a drop to the low tier.
pub const MIN_BITRATE_BPS: u32 = 400_000;
/// Minimum spacing between two adjustment actions.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5);

/// Policy tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdaptationConfig {
    pub min_bitrate_bps: u32,
    pub cooldown: Duration,
}

impl Default for AdaptationConfig {
    fn default() -> Self {
        Self {
            min_bitrate_bps: MIN_BITRATE_BPS,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptationAction {
    None,
    /// Change the video bitrate without interrupting the stream.
    UpdateBitrate(u32),
    /// Stop, reconfigure to the given profile and restart at the same destination.
    SoftRestart(StreamVideoProfile),
}

/// Decision rule with cool-down tracking.
#[derive(Debug, Clone)]
pub struct AdaptationPolicy {
    config: AdaptationConfig,
    last_action_at: Option<Instant>,
}

impl AdaptationPolicy {
    pub fn new(config: AdaptationConfig) -> Self {
        Self {
            config,
            last_action_at: None,
        }
    }

    pub fn config(&self) -> &AdaptationConfig {
        &self.config
    }

    /// True when no action has fired within the cool-down window.
    pub fn can_adjust_now(&self, now: Instant) -> bool {
        self.last_action_at
            .map_or(true, |last| now.saturating_duration_since(last) >= self.config.cooldown)
    }

    /// Decides what to do for `current` given a fresh classification.
    ///
    /// A soft restart to 854x480 happens when the target bitrate is below the
    /// floor, or when it changes and the classified resolution is smaller than
    /// the current one, and the stream is not already on the low tier.
    /// Otherwise a bitrate that clears the floor and differs from the current
    /// one is applied live. An unchanged bitrate above the floor is a no-op.
    pub fn decide(
        &self,
        current: &StreamVideoProfile,
        quality: &NetworkQuality,
        now: Instant,
    ) -> AdaptationAction {
        if !self.can_adjust_now(now) {
            return AdaptationAction::None;
        }

        let (target_w, target_h) = quality.encoder_resolution();
        let changed = quality.bitrate_bps != current.video_bitrate_bps;
        let downscale = changed && target_w * target_h < current.pixel_count();
        let below_floor = quality.bitrate_bps < self.config.min_bitrate_bps;

        if (below_floor || downscale) && !current.is_low_tier() {
            let mut fallback = StreamVideoProfile::low_tier_fallback();
            fallback.codec = current.codec;
            AdaptationAction::SoftRestart(fallback)
        } else if !below_floor && changed {
            AdaptationAction::UpdateBitrate(quality.bitrate_bps)
        } else {
            AdaptationAction::None
        }
    }

    /// Starts the cool-down window after an action was applied.
    pub fn record(&mut self, action: &AdaptationAction, now: Instant) {
        if *action != AdaptationAction::None {
            self.last_action_at = Some(now);
        }
    }
}

impl Default for AdaptationPolicy {
    fn default() -> Self {
        Self::new(AdaptationConfig::default())
    }
}

/// Event-driven adaptation loop, alive only while the stream is live.
///
/// Dropping the connectivity receiver when the loop ends is what unregisters
/// the monitor from connectivity notifications.
pub struct BitrateAdaptationMonitor {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl BitrateAdaptationMonitor {
    pub fn spawn(
        policy: AdaptationPolicy,
        events: broadcast::Receiver<ConnectivityEvent>,
        link: ControlLink,
    ) -> Self {
        let cancel = CancellationToken::new();
        let worker = MonitorWorker {
            policy,
            events,
            link,
            cancel: cancel.clone(),
        };

        info!("[Adaptation] Monitor started (cooldown {:?})", worker.policy.config().cooldown);
        let task = tokio::spawn(worker.run());

        Self { cancel, task }
    }

    /// Signals the loop to exit. Does not wait, so it is safe to call from the
    /// session context the loop may be waiting on.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the loop and waits for it to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Err(e) = (&mut self.task).await {
            warn!("[Adaptation] Monitor task join error: {}", e);
        }
    }
}

impl Drop for BitrateAdaptationMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct MonitorWorker {
    policy: AdaptationPolicy,
    events: broadcast::Receiver<ConnectivityEvent>,
    link: ControlLink,
    cancel: CancellationToken,
}

impl MonitorWorker {
    async fn run(mut self) {
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = self.events.recv() => event,
            };

            match event {
                Ok(ConnectivityEvent::Available(caps)) => self.evaluate(caps.as_ref()).await,
                Ok(ConnectivityEvent::CapabilitiesChanged(caps)) => self.evaluate(Some(&caps)).await,
                Ok(ConnectivityEvent::Lost) => debug!("[Adaptation] Network lost, waiting for next network"),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("[Adaptation] Skipped {} connectivity events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }

        info!("[Adaptation] Monitor stopped");
    }

    async fn evaluate(&mut self, caps: Option<&NetworkCapabilities>) {
        let snapshot = self.link.snapshot();
        if !snapshot.is_live() {
            return;
        }

        let quality = NetworkQualityEstimator::classify_capabilities(caps);
        let now = Instant::now();
        let action = self.policy.decide(&snapshot.profile, &quality, now);

        let applied = match action {
            AdaptationAction::None => return,
            AdaptationAction::UpdateBitrate(bitrate) => {
                let result = tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    result = self.link.set_bitrate(bitrate) => result,
                };
                result.map(|_| {
                    info!(
                        "[Adaptation] Bitrate adapted to {} kbps on {}",
                        bitrate / 1000,
                        quality.label()
                    );
                })
            }
            AdaptationAction::SoftRestart(profile) => {
                let result = tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    result = self.link.restart_at_profile(profile) => result,
                };
                result.map(|_| {
                    info!(
                        "[Adaptation] Soft restart to {}x{} on slow {} network",
                        profile.width,
                        profile.height,
                        quality.label()
                    );
                })
            }
        };

        match applied {
            Ok(()) => self.policy.record(&action, now),
            Err(e) => warn!("[Adaptation] Failed to apply {:?}: {}", action, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkTier;

    fn hd() -> StreamVideoProfile {
        StreamVideoProfile::new(1280, 720, 2_000_000)
    }

    fn quality(bitrate_bps: u32, width: u32) -> NetworkQuality {
        NetworkQuality {
            width,
            height: if width == 1280 { 720 } else { 480 },
            bitrate_bps,
            tier: NetworkTier::Other,
        }
    }

    #[test]
    fn slow_link_soft_restarts_to_low_tier() {
        let policy = AdaptationPolicy::default();
        let action = policy.decide(&hd(), &quality(300_000, 1280), Instant::now());
        assert_eq!(action, AdaptationAction::SoftRestart(StreamVideoProfile::low_tier_fallback()));
    }

    #[test]
    fn slow_link_on_low_tier_is_a_noop() {
        let policy = AdaptationPolicy::default();
        let current = StreamVideoProfile::low_tier_fallback();
        assert_eq!(
            policy.decide(&current, &quality(300_000, 480), Instant::now()),
            AdaptationAction::None
        );
    }

    #[test]
    fn unchanged_bitrate_is_a_noop() {
        let policy = AdaptationPolicy::default();
        assert_eq!(
            policy.decide(&hd(), &NetworkQuality::for_tier(NetworkTier::Wifi), Instant::now()),
            AdaptationAction::None
        );
    }

    #[test]
    fn unchanged_bitrate_on_smaller_tier_is_a_noop() {
        let policy = AdaptationPolicy::default();
        let current = hd().with_bitrate(900_000);
        assert_eq!(
            policy.decide(&current, &NetworkQuality::for_tier(NetworkTier::Cellular), Instant::now()),
            AdaptationAction::None
        );
    }

    #[test]
    fn changed_bitrate_on_same_resolution_updates_live() {
        let policy = AdaptationPolicy::default();
        let current = StreamVideoProfile::low_tier_fallback();
        assert_eq!(
            policy.decide(&current, &NetworkQuality::for_tier(NetworkTier::Other), Instant::now()),
            AdaptationAction::UpdateBitrate(700_000)
        );
    }

    #[test]
    fn upgrade_to_wifi_only_raises_bitrate() {
        let policy = AdaptationPolicy::default();
        let current = StreamVideoProfile::low_tier_fallback();
        assert_eq!(
            policy.decide(&current, &NetworkQuality::for_tier(NetworkTier::Wifi), Instant::now()),
            AdaptationAction::UpdateBitrate(2_000_000)
        );
    }

    #[test]
    fn hd_to_other_tier_restarts_once_then_cools_down() {
        let mut policy = AdaptationPolicy::default();
        let other = NetworkQuality::for_tier(NetworkTier::Other);
        let t0 = Instant::now();

        let action = policy.decide(&hd(), &other, t0);
        let AdaptationAction::SoftRestart(profile) = action else {
            panic!("expected soft restart, got {:?}", action);
        };
        assert_eq!((profile.width, profile.height, profile.video_bitrate_bps), (854, 480, 900_000));
        policy.record(&action, t0);

        // Same classification right after: cool-down holds it back.
        let again = policy.decide(&profile, &other, t0 + Duration::from_millis(200));
        assert_eq!(again, AdaptationAction::None);

        // After the window the low tier never restarts again; only the bitrate moves.
        let later = policy.decide(&profile, &other, t0 + Duration::from_secs(6));
        assert_eq!(later, AdaptationAction::UpdateBitrate(700_000));
    }

    #[test]
    fn noop_does_not_start_cooldown() {
        let mut policy = AdaptationPolicy::default();
        let t0 = Instant::now();
        policy.record(&AdaptationAction::None, t0);
        assert!(policy.can_adjust_now(t0));
    }

    #[test]
    fn cooldown_blocks_every_action_inside_window() {
        let mut policy = AdaptationPolicy::new(AdaptationConfig {
            min_bitrate_bps: MIN_BITRATE_BPS,
            cooldown: Duration::from_secs(5),
        });
        let t0 = Instant::now();
        policy.record(&AdaptationAction::UpdateBitrate(700_000), t0);

        let current = StreamVideoProfile::low_tier_fallback();
        let wifi = NetworkQuality::for_tier(NetworkTier::Wifi);
        assert_eq!(policy.decide(&current, &wifi, t0 + Duration::from_millis(4_999)), AdaptationAction::None);
        assert_eq!(
            policy.decide(&current, &wifi, t0 + Duration::from_secs(5)),
            AdaptationAction::UpdateBitrate(2_000_000)
        );
    }
}
