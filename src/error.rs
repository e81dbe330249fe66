//! Error taxonomy for the streaming core.
//!
//! Every variant is recoverable: callers log it, surface a notice and keep
//! the session usable. Nothing here is meant to terminate the process.

use thiserror::Error;

/// Failures reported by session, controller and validation operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The encoder rejected the requested video/audio profile.
    #[error("encoder rejected profile {width}x{height} @ {bitrate_bps} bps")]
    Configuration {
        width: u32,
        height: u32,
        bitrate_bps: u32,
    },

    /// RTMP connect, authentication or disconnect failure.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The camera could not start its preview.
    #[error("camera failure: {0}")]
    Camera(String),

    /// Camera or microphone permission is missing.
    #[error("camera/microphone permission denied")]
    PermissionDenied,

    #[error("invalid stream destination: {0}")]
    InvalidDestination(String),

    #[error("invalid match identity: {0}")]
    InvalidMatch(String),

    /// `start_live` was called before a successful `prepare`.
    #[error("encoder is not prepared")]
    NotPrepared,

    /// The operation is not valid in the controller's current state.
    #[error("operation {operation} not allowed while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    /// The session actor has shut down.
    #[error("streaming session is closed")]
    SessionClosed,
}

impl StreamError {
    /// Short user-facing text for transient notices.
    pub fn user_message(&self) -> String {
        match self {
            StreamError::Configuration { .. } => {
                "Unable to configure the encoder for this network".to_string()
            }
            StreamError::Transport(reason) => format!("Streaming connection failed: {}", reason),
            StreamError::PermissionDenied => {
                "Camera and microphone permissions are required. Enable them in system settings."
                    .to_string()
            }
            other => other.to_string(),
        }
    }
}
