/*!
 * Stream Session Controller
 *
 * Synchronous state machine over the camera/encoder:
 *
 *   Idle -> PreviewActive -> Live <-> RestartingLive
 *     any state -> Stopped (teardown)
 *
 * Only the session context calls into it, so every transition and every
 * encoder call is serialized. Platform resources (brightness, wake lock,
 * orientation) are held for the controller's lifetime and released on every
 * exit path.
 */

use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::encoder::StreamEncoder;
use super::TransportEvent;
use crate::error::StreamError;
use crate::metrics::SessionMetrics;
use crate::model::{MatchIdentity, ScoreState, StreamDestination, StreamVideoProfile};
use crate::network::NetworkQuality;
use crate::notifications::Notice;
use crate::overlay::{OverlayCache, OverlayPosition, ScoreOverlayRenderer};
use crate::platform::{PlatformServices, SessionResources, DEFAULT_LIVE_BRIGHTNESS};

/// Lifecycle of one streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    PreviewActive,
    Live,
    /// Transient, only observable inside a soft restart.
    RestartingLive,
    Stopped,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::PreviewActive => "preview",
            SessionState::Live => "live",
            SessionState::RestartingLive => "restarting",
            SessionState::Stopped => "stopped",
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Live | SessionState::RestartingLive)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Construction options.
#[derive(Debug, Clone, Copy)]
pub struct ControllerOptions {
    /// Score shown before the first update arrives.
    pub initial_score: ScoreState,
    pub live_brightness: f32,
    pub overlay_position: OverlayPosition,
    /// Profile assumed until the first successful prepare.
    pub initial_profile: StreamVideoProfile,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            initial_score: ScoreState::default(),
            live_brightness: DEFAULT_LIVE_BRIGHTNESS,
            overlay_position: OverlayPosition::BottomLeft,
            initial_profile: StreamVideoProfile::low_tier_fallback(),
        }
    }
}

pub struct StreamSessionController {
    session_id: Uuid,
    identity: MatchIdentity,
    destination: StreamDestination,
    encoder: Box<dyn StreamEncoder>,
    services: PlatformServices,
    resources: SessionResources,
    renderer: ScoreOverlayRenderer,
    overlay: OverlayCache,
    overlay_attached: bool,
    overlay_position: OverlayPosition,
    profile: StreamVideoProfile,
    prepared: bool,
    preview_pending: bool,
    /// Disconnect callbacks still owed by our own `stop_stream` calls.
    expected_disconnects: u32,
    state: SessionState,
    score: ScoreState,
    metrics: SessionMetrics,
}

impl StreamSessionController {
    /// Takes ownership of the encoder and locks landscape orientation.
    pub fn new(
        identity: MatchIdentity,
        destination: StreamDestination,
        encoder: Box<dyn StreamEncoder>,
        services: PlatformServices,
        options: ControllerOptions,
    ) -> Self {
        let session_id = Uuid::new_v4();
        let resources = SessionResources::acquire(&services, options.live_brightness);
        let renderer = ScoreOverlayRenderer::new(identity.team_a.as_str(), identity.team_b.as_str());

        info!(
            "[Controller] Session {} for match {} ({} vs {})",
            session_id, identity.match_id, identity.team_a, identity.team_b
        );

        Self {
            session_id,
            identity,
            destination,
            encoder,
            services,
            resources,
            renderer,
            overlay: OverlayCache::new(),
            overlay_attached: false,
            overlay_position: options.overlay_position,
            profile: options.initial_profile,
            prepared: false,
            preview_pending: false,
            expected_disconnects: 0,
            state: SessionState::Idle,
            score: options.initial_score,
            metrics: SessionMetrics::new(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn identity(&self) -> &MatchIdentity {
        &self.identity
    }

    pub fn destination(&self) -> &StreamDestination {
        &self.destination
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_live(&self) -> bool {
        self.state.is_live()
    }

    pub fn profile(&self) -> StreamVideoProfile {
        self.profile
    }

    pub fn score(&self) -> ScoreState {
        self.score
    }

    pub fn metrics(&self) -> &SessionMetrics {
        &self.metrics
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// True while preview waits for the surface to be laid out.
    pub fn is_preview_pending(&self) -> bool {
        self.preview_pending
    }

    /// Starts the camera preview with the scoreboard overlay attached.
    ///
    /// Without camera/microphone permission a notice is shown, the user is
    /// sent to settings and the session stays idle. If the surface has no size
    /// yet, the start is deferred to [`surface_ready`](Self::surface_ready).
    pub fn start_preview(&mut self) -> Result<(), StreamError> {
        match self.state {
            SessionState::Idle => {}
            SessionState::Stopped => return Err(self.invalid("start_preview")),
            _ => {
                debug!("[Controller] Preview already running ({})", self.state);
                return Ok(());
            }
        }

        if !self.services.has_stream_permissions() {
            warn!("[Controller] Camera/microphone permission missing");
            self.services.notifier.notify(Notice::permissions_required());
            self.services.permissions.open_app_settings();
            return Err(StreamError::PermissionDenied);
        }

        match self.encoder.surface_size() {
            Some((w, h)) if w > 0 && h > 0 => {}
            _ => {
                info!("[Controller] Surface not laid out yet, deferring preview");
                self.preview_pending = true;
                return Ok(());
            }
        }
        self.preview_pending = false;

        self.attach_overlay();
        if let Err(e) = self.encoder.start_preview() {
            error!("[Controller] Preview failed: {:#}", e);
            self.detach_overlay();
            return Err(StreamError::Camera(e.to_string()));
        }

        self.state = SessionState::PreviewActive;
        info!("[Controller] Preview started");
        Ok(())
    }

    /// Surface layout callback. Runs a deferred preview start.
    pub fn surface_ready(&mut self, width: u32, height: u32) -> Result<(), StreamError> {
        debug!("[Controller] Surface ready {}x{}", width, height);
        if !self.preview_pending || width == 0 || height == 0 {
            return Ok(());
        }
        self.start_preview()
    }

    /// Configures encoder video and audio for `profile`.
    ///
    /// On rejection the encoder is reset, the previously accepted profile is
    /// re-applied and a notice is shown.
    pub fn prepare(&mut self, profile: StreamVideoProfile) -> Result<(), StreamError> {
        if self.state.is_live() || self.state == SessionState::Stopped {
            return Err(self.invalid("prepare"));
        }
        self.configure(&profile)?;
        self.profile = profile;
        info!(
            "[Controller] Prepared {}x{} @ {} kbps",
            profile.width,
            profile.height,
            profile.video_bitrate_bps / 1000
        );
        Ok(())
    }

    /// Publishes to `destination`. Requires a successful [`prepare`](Self::prepare).
    pub fn start_live(&mut self, destination: StreamDestination) -> Result<(), StreamError> {
        match self.state {
            SessionState::Idle | SessionState::PreviewActive => {}
            SessionState::Live | SessionState::RestartingLive => {
                debug!("[Controller] Already live");
                return Ok(());
            }
            SessionState::Stopped => return Err(self.invalid("start_live")),
        }
        if !self.prepared {
            return Err(StreamError::NotPrepared);
        }

        self.destination = destination;
        self.expected_disconnects = 0;
        // Fresh filter scaled for the encoder resolution.
        self.attach_overlay();
        self.encoder.start_stream(self.destination.url());
        self.state = SessionState::Live;
        self.resources.enter_live();
        self.services.notifier.notify(Notice::stream_started());
        info!(
            "[Controller] Live at {}x{} @ {} kbps",
            self.profile.width,
            self.profile.height,
            self.profile.video_bitrate_bps / 1000
        );
        Ok(())
    }

    /// Prepares for a classified network and goes live at the session destination.
    pub fn go_live(&mut self, quality: &NetworkQuality) -> Result<(), StreamError> {
        let (width, height) = quality.encoder_resolution();
        let mut profile = StreamVideoProfile::new(width, height, quality.bitrate_bps);
        profile.codec = self.profile.codec;
        info!(
            "[Controller] Network {} -> {}x{} @ {} kbps",
            quality.label(),
            width,
            height,
            quality.bitrate_bps / 1000
        );

        self.prepare(profile)?;
        self.start_live(self.destination.clone())
    }

    /// Stops publishing and restores brightness. Preview keeps running.
    pub fn stop_live(&mut self) {
        if !self.state.is_live() {
            debug!("[Controller] stop_live while {}", self.state);
            return;
        }
        self.encoder.stop_stream();
        self.resources.exit_live();
        self.state = if self.encoder.is_on_preview() {
            SessionState::PreviewActive
        } else {
            SessionState::Idle
        };
        info!("[Controller] Live stopped");
    }

    /// Records a new score and redraws the overlay only if it changed.
    ///
    /// Returns true when a new bitmap was pushed to the filter.
    pub fn update_overlay(&mut self, score: ScoreState) -> bool {
        self.score = score;
        self.metrics.record_score_update();

        if !self.overlay_attached {
            // Rendered when the filter is attached.
            return false;
        }

        match self.overlay.update(&mut self.renderer, self.profile.resolution(), &score) {
            Some(image) => {
                self.encoder.update_overlay(image);
                self.metrics.record_overlay(true);
                true
            }
            None => {
                self.metrics.record_overlay(false);
                false
            }
        }
    }

    /// Changes the video bitrate without interrupting the stream.
    pub fn set_bitrate(&mut self, bitrate_bps: u32) -> Result<(), StreamError> {
        if self.state != SessionState::Live {
            return Err(self.invalid("set_bitrate"));
        }
        if bitrate_bps == self.profile.video_bitrate_bps {
            return Ok(());
        }
        self.encoder.set_video_bitrate_on_fly(bitrate_bps);
        self.profile = self.profile.with_bitrate(bitrate_bps);
        self.metrics.record_bitrate_update();
        debug!("[Controller] Bitrate now {} kbps", bitrate_bps / 1000);
        Ok(())
    }

    /// Stops, reconfigures and restarts the stream without leaving the live
    /// session. Brightness and wake lock are left untouched.
    ///
    /// Returns false when nothing needed to change. If the new profile is
    /// rejected the stream stays down and live resources are released.
    pub fn restart_at_profile(
        &mut self,
        profile: StreamVideoProfile,
        destination: StreamDestination,
    ) -> Result<bool, StreamError> {
        if self.state != SessionState::Live {
            return Err(self.invalid("restart_at_profile"));
        }
        if profile == self.profile && destination == self.destination {
            return Ok(false);
        }

        info!(
            "[Controller] Soft restart {}x{} -> {}x{} @ {} kbps",
            self.profile.width,
            self.profile.height,
            profile.width,
            profile.height,
            profile.video_bitrate_bps / 1000
        );
        self.state = SessionState::RestartingLive;
        self.encoder.stop_stream();
        self.expected_disconnects += 1;

        if let Err(e) = self.configure(&profile) {
            error!("[Controller] Soft restart failed: {}", e);
            self.resources.exit_live();
            self.state = if self.encoder.is_on_preview() {
                SessionState::PreviewActive
            } else {
                SessionState::Idle
            };
            return Err(e);
        }

        self.profile = profile;
        self.destination = destination;
        // Redraw for the new frame size before frames flow again.
        self.attach_overlay();
        self.encoder.start_stream(self.destination.url());
        self.state = SessionState::Live;
        self.metrics.record_soft_restart();
        Ok(true)
    }

    /// Reacts to an RTMP transport callback, already marshaled onto the
    /// session context.
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::ConnectionStarted { url } => {
                info!("[Transport] Connecting to {}", url);
            }
            TransportEvent::ConnectionSucceeded => info!("[Transport] Connected"),
            TransportEvent::AuthSucceeded => info!("[Transport] Authenticated"),
            TransportEvent::NewBitrate(bps) => debug!("[Transport] Measured {} kbps", bps / 1000),
            TransportEvent::ConnectionFailed { reason } => {
                error!("[Transport] Connection failed: {}", reason);
                self.fail_live(Notice::stream_failed(&reason));
            }
            TransportEvent::AuthError => {
                error!("[Transport] Authentication rejected");
                self.fail_live(Notice::stream_failed("authentication error"));
            }
            TransportEvent::Disconnected if self.expected_disconnects > 0 => {
                // Late report of a soft restart's own stop.
                self.expected_disconnects -= 1;
                debug!("[Transport] Disconnected after soft restart stop");
            }
            TransportEvent::Disconnected if !self.state.is_live() => {
                debug!("[Transport] Disconnected while {}", self.state);
            }
            TransportEvent::Disconnected => {
                warn!("[Transport] Disconnected");
                self.fail_live(Notice::stream_disconnected());
            }
        }
    }

    /// Stops stream and preview and releases every platform resource.
    /// Safe from any state, including partially initialized ones.
    pub fn teardown(&mut self) {
        if self.state == SessionState::Stopped {
            return;
        }
        if self.encoder.is_streaming() {
            self.encoder.stop_stream();
        }
        if self.encoder.is_on_preview() {
            self.encoder.stop_preview();
        }
        self.detach_overlay();
        self.overlay.invalidate();
        self.resources.release_all();
        self.prepared = false;
        self.preview_pending = false;
        self.state = SessionState::Stopped;

        let stats = self.metrics.snapshot();
        info!(
            "[Controller] Session {} stopped: {} renders, {} skips, {} restarts",
            self.session_id, stats.overlay_renders, stats.overlay_skips, stats.soft_restarts
        );
    }

    fn fail_live(&mut self, notice: Notice) {
        self.metrics.record_transport_failure();
        self.services.notifier.notify(notice);
        self.stop_live();
    }

    fn configure(&mut self, profile: &StreamVideoProfile) -> Result<(), StreamError> {
        let accepted = profile.is_supported_resolution()
            && self.encoder.prepare_video(profile)
            && self.encoder.prepare_audio(&profile.audio);

        if !accepted {
            warn!(
                "[Controller] Encoder rejected {}x{} @ {} bps, reverting",
                profile.width, profile.height, profile.video_bitrate_bps
            );
            self.encoder.reset_configuration();
            if self.prepared {
                let prior = self.profile;
                self.prepared = self.encoder.prepare_video(&prior) && self.encoder.prepare_audio(&prior.audio);
                if !self.prepared {
                    error!("[Controller] Could not restore {}x{}", prior.width, prior.height);
                }
            }
            self.services.notifier.notify(Notice::prepare_failed());
            return Err(StreamError::Configuration {
                width: profile.width,
                height: profile.height,
                bitrate_bps: profile.video_bitrate_bps,
            });
        }

        self.prepared = true;
        Ok(())
    }

    /// (Re)installs the filter with a bitmap rendered for the current profile.
    fn attach_overlay(&mut self) {
        let frame = self.profile.resolution();
        let image = self.overlay.render_now(&mut self.renderer, frame, &self.score);
        self.metrics.record_overlay(true);
        if self.overlay_attached {
            self.encoder.detach_overlay();
        }
        self.encoder.attach_overlay(image, frame, self.overlay_position);
        self.overlay_attached = true;
    }

    fn detach_overlay(&mut self) {
        if self.overlay_attached {
            self.encoder.detach_overlay();
            self.overlay_attached = false;
        }
    }

    fn invalid(&self, operation: &'static str) -> StreamError {
        StreamError::InvalidState {
            operation,
            state: self.state.name(),
        }
    }
}

impl Drop for StreamSessionController {
    fn drop(&mut self) {
        self.teardown();
    }
}
