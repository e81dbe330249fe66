/*!
 * SpikeStream Core Library
 *
 * Live volleyball streaming core: network-aware encoder profiles, bitrate
 * adaptation, the scoreboard overlay and the real-time score channel.
 */

pub mod adaptation;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod network;
pub mod notifications;
pub mod overlay;
pub mod platform;
pub mod score_channel;
pub mod streaming;
pub mod validation;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use adaptation::{AdaptationAction, AdaptationConfig, AdaptationPolicy, BitrateAdaptationMonitor};
pub use config::CoreConfig;
pub use error::StreamError;
pub use model::{MatchIdentity, ScoreState, StreamDestination, StreamVideoProfile};
pub use network::{NetworkQuality, NetworkQualityEstimator, NetworkTier};
pub use overlay::{OverlayCache, ScoreOverlayRenderer};
pub use score_channel::{ChannelEvent, ScoreEventChannel};
pub use streaming::{SessionHandle, StreamSession, StreamSessionController};
