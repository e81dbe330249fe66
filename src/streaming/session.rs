/*!
 * Stream Session
 *
 * Runs the controller on a single task that owns it. User intents, score
 * updates, transport callbacks and adaptation decisions all arrive as
 * messages, so state transitions never interleave. The actor also spawns the
 * adaptation monitor while live, stops it otherwise, and tracks the active
 * network for the status banner.
 */

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::controller::{SessionState, StreamSessionController};
use super::{TransportEvent, TransportEventSink};
use crate::adaptation::{AdaptationConfig, AdaptationPolicy, BitrateAdaptationMonitor};
use crate::error::StreamError;
use crate::metrics::SessionStats;
use crate::model::{ScoreState, StreamDestination, StreamVideoProfile};
use crate::network::{ConnectivityEvent, NetworkQuality, NetworkQualityEstimator, NetworkTier};
use crate::notifications::{Notice, Notifier};
use crate::platform::PlatformServices;
use crate::score_channel::ChannelEvent;

pub const DEFAULT_COMMAND_BUFFER: usize = 32;

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub adaptation: AdaptationConfig,
    pub command_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            adaptation: AdaptationConfig::default(),
            command_buffer: DEFAULT_COMMAND_BUFFER,
        }
    }
}

/// Published view of the session, refreshed after every message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub match_id: String,
    pub state: SessionState,
    pub profile: StreamVideoProfile,
    pub score: ScoreState,
    /// Active network, for the status banner.
    pub network_tier: NetworkTier,
    pub stats: SessionStats,
}

impl SessionSnapshot {
    pub fn is_live(&self) -> bool {
        self.state.is_live()
    }

    fn of(controller: &StreamSessionController, network_tier: NetworkTier) -> Self {
        Self {
            session_id: controller.session_id(),
            match_id: controller.identity().match_id.clone(),
            state: controller.state(),
            profile: controller.profile(),
            score: controller.score(),
            network_tier,
            stats: controller.metrics().snapshot(),
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T, StreamError>>;

enum SessionCommand {
    StartPreview(Reply<()>),
    SurfaceReady {
        width: u32,
        height: u32,
        reply: Reply<()>,
    },
    Prepare(StreamVideoProfile, Reply<()>),
    StartLive(Option<StreamDestination>, Reply<()>),
    GoLive(Reply<NetworkQuality>),
    StopLive(Reply<()>),
    UpdateScore(ScoreState),
    SetBitrate(u32, Reply<()>),
    RestartAtProfile {
        profile: StreamVideoProfile,
        destination: Option<StreamDestination>,
        reply: Reply<bool>,
    },
    Teardown(oneshot::Sender<()>),
}

async fn request<T>(
    commands: &mpsc::Sender<SessionCommand>,
    build: impl FnOnce(Reply<T>) -> SessionCommand,
) -> Result<T, StreamError> {
    let (tx, rx) = oneshot::channel();
    commands
        .send(build(tx))
        .await
        .map_err(|_| StreamError::SessionClosed)?;
    rx.await.map_err(|_| StreamError::SessionClosed)?
}

pub struct StreamSession;

impl StreamSession {
    /// Moves the controller onto its own task.
    ///
    /// The session ends on [`SessionHandle::teardown`] or once every handle
    /// is dropped; both paths tear the controller down.
    pub fn spawn(
        controller: StreamSessionController,
        services: PlatformServices,
        config: SessionConfig,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer.max(1));
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();

        let estimator = NetworkQualityEstimator::new(services.connectivity.clone());
        let network_tier = estimator.classify().tier;
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::of(&controller, network_tier));

        let actor = SessionActor {
            controller,
            commands: command_rx,
            control: command_tx.downgrade(),
            transport: transport_rx,
            connectivity: Some(services.subscribe_connectivity()),
            snapshot: snapshot_tx,
            estimator,
            services,
            adaptation: config.adaptation,
            monitor: None,
            network_tier,
        };
        let task = tokio::spawn(actor.run());

        let handle = SessionHandle {
            commands: command_tx,
            transport: TransportEventSink::new(transport_tx),
            snapshot: snapshot_rx,
        };
        (handle, task)
    }
}

/// Cloneable front door to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    transport: TransportEventSink,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub async fn start_preview(&self) -> Result<(), StreamError> {
        request(&self.commands, SessionCommand::StartPreview).await
    }

    pub async fn surface_ready(&self, width: u32, height: u32) -> Result<(), StreamError> {
        request(&self.commands, |reply| SessionCommand::SurfaceReady { width, height, reply }).await
    }

    pub async fn prepare(&self, profile: StreamVideoProfile) -> Result<(), StreamError> {
        request(&self.commands, |reply| SessionCommand::Prepare(profile, reply)).await
    }

    /// Starts publishing; `None` keeps the session destination.
    pub async fn start_live(&self, destination: Option<StreamDestination>) -> Result<(), StreamError> {
        request(&self.commands, |reply| SessionCommand::StartLive(destination, reply)).await
    }

    /// Classifies the network, prepares for it and starts publishing.
    pub async fn go_live(&self) -> Result<NetworkQuality, StreamError> {
        request(&self.commands, SessionCommand::GoLive).await
    }

    pub async fn stop_live(&self) -> Result<(), StreamError> {
        request(&self.commands, SessionCommand::StopLive).await
    }

    /// Queues a score for the overlay. Does not wait for the redraw.
    pub async fn update_score(&self, score: ScoreState) -> Result<(), StreamError> {
        self.commands
            .send(SessionCommand::UpdateScore(score))
            .await
            .map_err(|_| StreamError::SessionClosed)
    }

    pub async fn set_bitrate(&self, bitrate_bps: u32) -> Result<(), StreamError> {
        request(&self.commands, |reply| SessionCommand::SetBitrate(bitrate_bps, reply)).await
    }

    pub async fn restart_at_profile(
        &self,
        profile: StreamVideoProfile,
        destination: Option<StreamDestination>,
    ) -> Result<bool, StreamError> {
        request(&self.commands, |reply| SessionCommand::RestartAtProfile {
            profile,
            destination,
            reply,
        })
        .await
    }

    /// Stops everything and ends the session. Returns once resources are released.
    pub async fn teardown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(SessionCommand::Teardown(tx)).await.is_err() {
            debug!("[Session] Teardown after session ended");
            return;
        }
        let _ = rx.await;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Sink to hand to the RTMP transport for its callbacks.
    pub fn transport_sink(&self) -> TransportEventSink {
        self.transport.clone()
    }

    /// Forwards score-channel events into the session until either side closes.
    pub fn follow_scores(
        &self,
        mut events: mpsc::Receiver<ChannelEvent>,
        notifier: Arc<dyn Notifier>,
    ) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    ChannelEvent::Connected => notifier.notify(Notice::channel_connecting()),
                    ChannelEvent::ConnectError(reason) => notifier.notify(Notice::channel_error(&reason)),
                    ChannelEvent::Disconnected => notifier.notify(Notice::channel_disconnected()),
                    ChannelEvent::ScoreUpdated(score) => {
                        if handle.update_score(score).await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("[Session] Score forwarding ended");
        })
    }
}

/// The adaptation monitor's view of the session.
///
/// Holds only a weak command sender so a running monitor never keeps the
/// session alive.
#[derive(Clone)]
pub struct ControlLink {
    commands: mpsc::WeakSender<SessionCommand>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl ControlLink {
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub async fn set_bitrate(&self, bitrate_bps: u32) -> Result<(), StreamError> {
        let commands = self.commands.upgrade().ok_or(StreamError::SessionClosed)?;
        request(&commands, |reply| SessionCommand::SetBitrate(bitrate_bps, reply)).await
    }

    /// Soft restart at the current destination.
    pub async fn restart_at_profile(&self, profile: StreamVideoProfile) -> Result<bool, StreamError> {
        let commands = self.commands.upgrade().ok_or(StreamError::SessionClosed)?;
        request(&commands, |reply| SessionCommand::RestartAtProfile {
            profile,
            destination: None,
            reply,
        })
        .await
    }
}

struct SessionActor {
    controller: StreamSessionController,
    commands: mpsc::Receiver<SessionCommand>,
    control: mpsc::WeakSender<SessionCommand>,
    transport: mpsc::UnboundedReceiver<TransportEvent>,
    connectivity: Option<broadcast::Receiver<ConnectivityEvent>>,
    snapshot: watch::Sender<SessionSnapshot>,
    estimator: NetworkQualityEstimator,
    services: PlatformServices,
    adaptation: AdaptationConfig,
    monitor: Option<BitrateAdaptationMonitor>,
    network_tier: NetworkTier,
}

impl SessionActor {
    async fn run(mut self) {
        info!("[Session] {} running", self.controller.session_id());

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.handle(command) {
                            return;
                        }
                    }
                    None => {
                        debug!("[Session] All handles dropped");
                        break;
                    }
                },
                Some(event) = self.transport.recv() => {
                    self.controller.handle_transport_event(event);
                    self.settle();
                }
                event = next_connectivity(&mut self.connectivity) => {
                    self.track_network(event);
                    self.settle();
                }
            }
        }

        self.shutdown();
    }

    /// Returns false once the session has been torn down.
    fn handle(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::StartPreview(reply) => {
                let result = self.controller.start_preview();
                self.respond(reply, result);
            }
            SessionCommand::SurfaceReady { width, height, reply } => {
                let result = self.controller.surface_ready(width, height);
                self.respond(reply, result);
            }
            SessionCommand::Prepare(profile, reply) => {
                let result = self.controller.prepare(profile);
                self.respond(reply, result);
            }
            SessionCommand::StartLive(destination, reply) => {
                let destination = destination.unwrap_or_else(|| self.controller.destination().clone());
                let result = self.controller.start_live(destination);
                self.respond(reply, result);
            }
            SessionCommand::GoLive(reply) => {
                let quality = self.estimator.classify();
                let result = self.controller.go_live(&quality).map(|()| quality);
                if result.is_ok() && quality.tier == NetworkTier::Cellular {
                    self.services.notifier.notify(Notice::cellular_warning());
                }
                self.respond(reply, result);
            }
            SessionCommand::StopLive(reply) => {
                self.controller.stop_live();
                self.respond(reply, Ok(()));
            }
            SessionCommand::UpdateScore(score) => {
                self.controller.update_overlay(score);
                self.settle();
            }
            SessionCommand::SetBitrate(bitrate_bps, reply) => {
                let result = self.controller.set_bitrate(bitrate_bps);
                self.respond(reply, result);
            }
            SessionCommand::RestartAtProfile {
                profile,
                destination,
                reply,
            } => {
                let destination = destination.unwrap_or_else(|| self.controller.destination().clone());
                let result = self.controller.restart_at_profile(profile, destination);
                self.respond(reply, result);
            }
            SessionCommand::Teardown(done) => {
                self.shutdown();
                let _ = done.send(());
                return false;
            }
        }
        true
    }

    /// Publishes state before the caller sees the result.
    fn respond<T>(&mut self, reply: Reply<T>, result: Result<T, StreamError>) {
        self.settle();
        if reply.send(result).is_err() {
            debug!("[Session] Caller went away before the reply");
        }
    }

    fn settle(&mut self) {
        self.publish();
        self.sync_monitor();
    }

    fn publish(&self) {
        self.snapshot
            .send_replace(SessionSnapshot::of(&self.controller, self.network_tier));
    }

    /// Runs the adaptation monitor exactly while live.
    fn sync_monitor(&mut self) {
        if self.controller.is_live() {
            if self.monitor.is_none() {
                let link = ControlLink {
                    commands: self.control.clone(),
                    snapshot: self.snapshot.subscribe(),
                };
                self.monitor = Some(BitrateAdaptationMonitor::spawn(
                    AdaptationPolicy::new(self.adaptation),
                    self.services.subscribe_connectivity(),
                    link,
                ));
            }
        } else if let Some(monitor) = self.monitor.take() {
            monitor.stop();
        }
    }

    fn track_network(&mut self, event: ConnectivityEvent) {
        let tier = match event {
            ConnectivityEvent::Available(caps) => NetworkTier::from_capabilities(caps.as_ref()),
            ConnectivityEvent::CapabilitiesChanged(caps) => NetworkTier::from_capabilities(Some(&caps)),
            ConnectivityEvent::Lost => NetworkTier::Disconnected,
        };
        if tier == self.network_tier {
            return;
        }
        info!("[Session] Network {} -> {}", self.network_tier, tier);
        if tier == NetworkTier::Cellular {
            self.services.notifier.notify(Notice::cellular_warning());
        }
        self.network_tier = tier;
    }

    fn shutdown(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.stop();
        }
        self.controller.teardown();
        self.connectivity = None;
        self.publish();
    }
}

async fn next_connectivity(
    receiver: &mut Option<broadcast::Receiver<ConnectivityEvent>>,
) -> ConnectivityEvent {
    loop {
        let Some(rx) = receiver.as_mut() else {
            return std::future::pending().await;
        };
        match rx.recv().await {
            Ok(event) => return event,
            Err(RecvError::Lagged(skipped)) => {
                warn!("[Session] Skipped {} connectivity events", skipped);
            }
            Err(RecvError::Closed) => {
                debug!("[Session] Connectivity source closed");
                *receiver = None;
            }
        }
    }
}
