//! Real-time score channel.
//!
//! A Socket.IO v4 client over a WebSocket that joins one match room,
//! turns `score_update` events for that match into [`ScoreState`]s and
//! carries `low_battery` reports back to the server.

pub mod battery;
pub mod channel;
pub mod protocol;
pub mod transport;

pub use battery::{battery_percent, BatteryReporter, LowBatteryLatch, LowBatteryReport, LOW_BATTERY_THRESHOLD};
pub use channel::{ChannelEmitter, ScoreEventChannel, ScoreFilter};
pub use transport::ChannelOptions;

use crate::model::ScoreState;

/// What the channel reports to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Connected and joining the match room.
    Connected,
    ConnectError(String),
    Disconnected,
    ScoreUpdated(ScoreState),
}
