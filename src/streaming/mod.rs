/*!
 * Streaming Module
 *
 * Owns the camera/encoder lifecycle for a live match: preview, encoder
 * configuration, RTMP start/stop, soft restarts and the overlay compositing
 * filter. The controller is the single writer of encoder state; everything
 * else reaches it through the session handle.
 */

pub mod controller;
pub mod encoder;
pub mod session;

pub use controller::{ControllerOptions, SessionState, StreamSessionController};
pub use encoder::StreamEncoder;
pub use session::{ControlLink, SessionConfig, SessionHandle, SessionSnapshot, StreamSession};

use tokio::sync::mpsc;
use tracing::debug;

/// Connection callbacks reported asynchronously by the RTMP transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    ConnectionStarted { url: String },
    ConnectionSucceeded,
    ConnectionFailed { reason: String },
    Disconnected,
    AuthError,
    AuthSucceeded,
    /// Bitrate measured by the muxer, bits per second.
    NewBitrate(u64),
}

/// Sender the platform transport uses to report [`TransportEvent`]s.
///
/// Reporting never blocks and never fails; events are marshaled onto the
/// session context before anything acts on them.
#[derive(Debug, Clone)]
pub struct TransportEventSink {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportEventSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self { tx }
    }

    pub fn report(&self, event: TransportEvent) {
        if let Err(e) = self.tx.send(event) {
            debug!("[Transport] Session gone, dropping {:?}", e.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sink_survives_closed_session() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = TransportEventSink::new(tx);

        sink.report(TransportEvent::ConnectionSucceeded);
        assert_eq!(rx.recv().await, Some(TransportEvent::ConnectionSucceeded));

        drop(rx);
        sink.report(TransportEvent::Disconnected);
    }
}
