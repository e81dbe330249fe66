//! User Notices Module
//!
//! Transient, non-blocking notices (toasts) that inform the user of stream
//! and score-channel status changes. The platform decides how to show them.

use tracing::{error, info, warn};

/// Notice urgency/importance level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    /// Informational message
    Info,

    /// Success message
    Success,

    /// Warning message
    Warning,

    /// Error message
    Error,
}

/// How long a notice stays on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeDuration {
    Short,
    Long,
}

impl NotificationLevel {
    /// Warnings and errors stay up longer.
    pub fn duration(&self) -> NoticeDuration {
        match self {
            NotificationLevel::Info | NotificationLevel::Success => NoticeDuration::Short,
            NotificationLevel::Warning | NotificationLevel::Error => NoticeDuration::Long,
        }
    }
}

/// A notice ready to be shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NotificationLevel,
    pub message: String,
}

impl Notice {
    pub fn new(level: NotificationLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }

    pub fn duration(&self) -> NoticeDuration {
        self.level.duration()
    }

    /// Score channel connected, joining the match room.
    pub fn channel_connecting() -> Self {
        Self::new(NotificationLevel::Info, "Connecting...")
    }

    pub fn channel_error(reason: &str) -> Self {
        Self::new(NotificationLevel::Warning, format!("Connection error: {}", reason))
    }

    pub fn channel_disconnected() -> Self {
        Self::new(NotificationLevel::Warning, "Score updates disconnected")
    }

    pub fn permissions_required() -> Self {
        Self::new(
            NotificationLevel::Error,
            "Camera and microphone permissions are required. Enable them in system settings.",
        )
    }

    pub fn stream_started() -> Self {
        Self::new(NotificationLevel::Success, "Streaming launched")
    }

    pub fn stream_failed(reason: &str) -> Self {
        Self::new(NotificationLevel::Error, format!("Streaming connection failed: {}", reason))
    }

    pub fn stream_disconnected() -> Self {
        Self::new(NotificationLevel::Warning, "Streaming server disconnected")
    }

    pub fn prepare_failed() -> Self {
        Self::new(
            NotificationLevel::Error,
            "Unable to configure the encoder for this network",
        )
    }

    pub fn cellular_warning() -> Self {
        Self::new(
            NotificationLevel::Warning,
            "Streaming over mobile data: quality is reduced and data usage is high",
        )
    }
}

/// Sink for notices.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Writes notices to the log. Used by headless tools.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: Notice) {
        match notice.level {
            NotificationLevel::Info | NotificationLevel::Success => {
                info!("[Notice] {}", notice.message)
            }
            NotificationLevel::Warning => warn!("[Notice] {}", notice.message),
            NotificationLevel::Error => error!("[Notice] {}", notice.message),
        }
    }
}

/// Forwards notices to a channel, e.g. for a UI layer polling on its own thread.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: tokio::sync::mpsc::UnboundedSender<Notice>,
}

impl ChannelNotifier {
    pub fn channel() -> (Self, tokio::sync::mpsc::UnboundedReceiver<Notice>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notice: Notice) {
        // Receiver gone means nobody is showing notices anymore.
        let _ = self.tx.send(notice);
    }
}
