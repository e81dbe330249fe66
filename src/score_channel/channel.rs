/*!
 * Score Event Channel
 *
 * Background task that keeps one Socket.IO connection to the score server:
 * handshake, `join_match` on every (re)connect, heartbeat replies, bounded
 * reconnection and outgoing emits. Score updates for other matches are
 * dropped here; the session only ever sees its own match.
 */

use anyhow::{anyhow, bail, Context, Result};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Duration, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::protocol::{EnginePacket, OpenInfo, ScoreUpdate, SocketPacket};
use super::transport::{open_socket, ChannelOptions, SocketStream};
use super::ChannelEvent;
use crate::model::ScoreState;

/// Buffered events before the channel waits for the session to catch up.
pub const EVENT_BUFFER: usize = 64;

/// Selects `score_update` events for one match and derives its score.
#[derive(Debug, Clone)]
pub struct ScoreFilter {
    match_id: String,
}

impl ScoreFilter {
    pub fn new(match_id: impl Into<String>) -> Self {
        Self {
            match_id: match_id.into(),
        }
    }

    pub fn match_id(&self) -> &str {
        &self.match_id
    }

    pub fn join_payload(&self) -> Value {
        serde_json::json!({ "matchId": self.match_id })
    }

    /// Score carried by an event, if it is a well-formed update for this match.
    pub fn score_from_event(&self, name: &str, args: &[Value]) -> Option<ScoreState> {
        if name != "score_update" {
            return None;
        }
        let update: ScoreUpdate = match serde_json::from_value(args.first()?.clone()) {
            Ok(update) => update,
            Err(e) => {
                debug!("[ScoreChannel] Malformed score_update: {}", e);
                return None;
            }
        };
        if !update.is_for(&self.match_id) {
            return None;
        }
        ScoreState::from_sets(&update.sets)
    }
}

#[derive(Debug)]
pub(crate) struct Outgoing {
    pub(crate) name: String,
    pub(crate) payload: Value,
}

/// Queues events for the server. Emits made while disconnected are sent
/// after the next connect.
#[derive(Debug, Clone)]
pub struct ChannelEmitter {
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl ChannelEmitter {
    pub fn emit(&self, name: &str, payload: Value) -> Result<()> {
        self.tx
            .send(Outgoing {
                name: name.to_string(),
                payload,
            })
            .map_err(|_| anyhow!("Score channel is closed"))
    }

    /// Emitter whose queue the caller drains directly.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

pub struct ScoreEventChannel {
    emitter: ChannelEmitter,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ScoreEventChannel {
    /// Starts connecting in the background. Events for `match_id` arrive on
    /// the returned receiver, which closes when the channel gives up or closes.
    pub fn connect(options: ChannelOptions, match_id: &str) -> Result<(Self, mpsc::Receiver<ChannelEvent>)> {
        let endpoint = options.endpoint()?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let worker = ChannelWorker {
            options,
            endpoint,
            filter: ScoreFilter::new(match_id),
            events: events_tx,
            outgoing: outgoing_rx,
        };
        info!("[ScoreChannel] Following match {} on {}", match_id, worker.endpoint);
        let task = tokio::spawn(worker.run(cancel.clone()));

        let channel = Self {
            emitter: ChannelEmitter { tx: outgoing_tx },
            cancel,
            task,
        };
        Ok((channel, events_rx))
    }

    pub fn emitter(&self) -> ChannelEmitter {
        self.emitter.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Disconnects, unregisters handlers and waits for the task to end.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Err(e) = (&mut self.task).await {
            warn!("[ScoreChannel] Task join error: {}", e);
        }
    }
}

impl Drop for ScoreEventChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum SessionEnd {
    Cancelled,
    Lost(String),
}

type SocketSink = SplitSink<SocketStream, Message>;

struct ChannelWorker {
    options: ChannelOptions,
    endpoint: Url,
    filter: ScoreFilter,
    events: mpsc::Sender<ChannelEvent>,
    outgoing: mpsc::UnboundedReceiver<Outgoing>,
}

impl ChannelWorker {
    async fn run(mut self, cancel: CancellationToken) {
        let mut failures = 0u32;

        loop {
            let attempt = tokio::select! {
                _ = cancel.cancelled() => break,
                result = tokio::time::timeout(self.options.connect_timeout, handshake(&self.endpoint)) => result,
            };

            match attempt {
                Ok(Ok((socket, open))) => {
                    failures = 0;
                    info!("[ScoreChannel] Connected (sid {})", open.sid);
                    self.publish(ChannelEvent::Connected).await;

                    match self.pump(socket, &open, &cancel).await {
                        SessionEnd::Cancelled => break,
                        SessionEnd::Lost(reason) => {
                            warn!("[ScoreChannel] Disconnected: {}", reason);
                            self.publish(ChannelEvent::Disconnected).await;
                        }
                    }
                }
                Ok(Err(e)) => {
                    failures += 1;
                    warn!("[ScoreChannel] Connection error: {:#}", e);
                    self.publish(ChannelEvent::ConnectError(format!("{:#}", e))).await;
                }
                Err(_) => {
                    failures += 1;
                    warn!("[ScoreChannel] Connection timed out after {:?}", self.options.connect_timeout);
                    self.publish(ChannelEvent::ConnectError("timeout".to_string())).await;
                }
            }

            if !self.options.reconnection {
                break;
            }
            if failures > self.options.reconnection_attempts {
                warn!("[ScoreChannel] Giving up after {} failed attempts", failures);
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.options.reconnection_delay) => {}
            }
            debug!("[ScoreChannel] Reconnecting (attempt {})", failures + 1);
        }

        info!("[ScoreChannel] Stopped");
    }

    async fn publish(&self, event: ChannelEvent) {
        if self.events.send(event).await.is_err() {
            debug!("[ScoreChannel] No listener for channel events");
        }
    }

    /// Serves one established connection until it drops or is cancelled.
    async fn pump(&mut self, socket: SocketStream, open: &OpenInfo, cancel: &CancellationToken) -> SessionEnd {
        let (mut sink, mut stream) = socket.split();
        let liveness = Duration::from_millis(open.ping_interval + open.ping_timeout);
        let mut deadline = Instant::now() + liveness;

        let join = SocketPacket::event("join_match", self.filter.join_payload());
        if let Err(e) = send_packet(&mut sink, EnginePacket::Message(join)).await {
            return SessionEnd::Lost(e.to_string());
        }
        debug!("[ScoreChannel] Joined match {}", self.filter.match_id());

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let goodbye = SocketPacket::Disconnect { namespace: "/".to_string() };
                    let _ = send_packet(&mut sink, EnginePacket::Message(goodbye)).await;
                    let _ = sink.close().await;
                    return SessionEnd::Cancelled;
                }
                _ = sleep_until(deadline) => {
                    return SessionEnd::Lost("ping timeout".to_string());
                }
                Some(out) = self.outgoing.recv() => {
                    let packet = SocketPacket::event(&out.name, out.payload);
                    if let Err(e) = send_packet(&mut sink, EnginePacket::Message(packet)).await {
                        return SessionEnd::Lost(e.to_string());
                    }
                    debug!("[ScoreChannel] Emitted {}", out.name);
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        deadline = Instant::now() + liveness;
                        match EnginePacket::decode(text.as_str()) {
                            Ok(packet) => {
                                if let Some(end) = self.on_packet(packet, &mut sink).await {
                                    return end;
                                }
                            }
                            Err(e) => debug!("[ScoreChannel] Ignoring frame: {}", e),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return SessionEnd::Lost("connection closed".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return SessionEnd::Lost(e.to_string()),
                },
            }
        }
    }

    async fn on_packet(&mut self, packet: EnginePacket, sink: &mut SocketSink) -> Option<SessionEnd> {
        match packet {
            EnginePacket::Ping(data) => {
                if let Err(e) = send_packet(sink, EnginePacket::Pong(data)).await {
                    return Some(SessionEnd::Lost(e.to_string()));
                }
            }
            EnginePacket::Close => return Some(SessionEnd::Lost("server closed the session".to_string())),
            EnginePacket::Message(SocketPacket::Event { name, args, .. }) => {
                if let Some(score) = self.filter.score_from_event(&name, &args) {
                    debug!("[ScoreChannel] Score {:?}", score.as_array());
                    self.publish(ChannelEvent::ScoreUpdated(score)).await;
                }
            }
            EnginePacket::Message(SocketPacket::Disconnect { .. }) => {
                return Some(SessionEnd::Lost("server disconnected the client".to_string()));
            }
            EnginePacket::Message(SocketPacket::ConnectError { message, .. }) => {
                return Some(SessionEnd::Lost(message));
            }
            other => debug!("[ScoreChannel] Unhandled packet {:?}", other),
        }
        None
    }
}

async fn send_packet(sink: &mut SocketSink, packet: EnginePacket) -> Result<()> {
    sink.send(Message::Text(packet.encode().into()))
        .await
        .context("Failed to send to score server")
}

async fn next_packet(socket: &mut SocketStream) -> Result<EnginePacket> {
    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => return Ok(EnginePacket::decode(text.as_str())?),
            Some(Ok(Message::Close(_))) | None => bail!("Connection closed during handshake"),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e).context("WebSocket read failed"),
        }
    }
}

/// Opens the socket and completes the Engine.IO open and Socket.IO connect.
async fn handshake(endpoint: &Url) -> Result<(SocketStream, OpenInfo)> {
    let mut socket = open_socket(endpoint).await?;

    let open = loop {
        match next_packet(&mut socket).await? {
            EnginePacket::Open(info) => break info,
            other => debug!("[ScoreChannel] Ignoring {:?} before open", other),
        }
    };

    let connect = EnginePacket::Message(SocketPacket::connect("/"));
    socket
        .send(Message::Text(connect.encode().into()))
        .await
        .context("Failed to send connect")?;

    loop {
        match next_packet(&mut socket).await? {
            EnginePacket::Message(SocketPacket::Connect { .. }) => return Ok((socket, open)),
            EnginePacket::Message(SocketPacket::ConnectError { message, .. }) => bail!("{}", message),
            EnginePacket::Ping(data) => {
                socket
                    .send(Message::Text(EnginePacket::Pong(data).encode().into()))
                    .await
                    .context("Failed to answer ping")?;
            }
            EnginePacket::Close => bail!("Server closed the session during handshake"),
            other => debug!("[ScoreChannel] Ignoring {:?} during handshake", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::WebSocketStream;

    const OPEN: &str =
        r#"0{"sid":"s1","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;

    async fn next_text(ws: &mut WebSocketStream<tokio::net::TcpStream>) -> Option<String> {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return Some(text.as_str().to_string()),
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
                Some(Ok(_)) => {}
            }
        }
    }

    async fn send_text(ws: &mut WebSocketStream<tokio::net::TcpStream>, text: &str) {
        ws.send(Message::Text(text.to_string().into())).await.unwrap();
    }

    async fn recv(events: &mut mpsc::Receiver<ChannelEvent>) -> Option<ChannelEvent> {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for channel event")
    }

    fn options_for(addr: std::net::SocketAddr) -> ChannelOptions {
        let mut options = ChannelOptions::new(Url::parse(&format!("http://{}", addr)).unwrap());
        options.reconnection = false;
        options.connect_timeout = Duration::from_secs(5);
        options
    }

    #[test]
    fn filter_ignores_other_matches_and_events() {
        let filter = ScoreFilter::new("m-1");
        let update = json!({ "matchId": "m-1", "teamASets": [25, 20, 5], "teamBSets": [20, 25, 3] });

        assert_eq!(
            filter.score_from_event("score_update", &[update.clone()]),
            Some(ScoreState::new(5, 3, 1, 1))
        );
        assert_eq!(filter.score_from_event("chat", &[update]), None);

        let other = json!({ "matchId": "m-2", "teamASets": [1], "teamBSets": [2] });
        assert_eq!(filter.score_from_event("score_update", &[other]), None);
        assert_eq!(filter.score_from_event("score_update", &[]), None);
    }

    #[test]
    fn filter_drops_malformed_updates() {
        let filter = ScoreFilter::new("m-1");
        let missing_sets = json!({ "matchId": "m-1" });
        assert_eq!(filter.score_from_event("score_update", &[missing_sets]), None);

        let empty_sets = json!({ "matchId": "m-1", "teamASets": [], "teamBSets": [3] });
        assert_eq!(filter.score_from_event("score_update", &[empty_sets]), None);
    }

    #[test]
    fn join_payload_names_match() {
        assert_eq!(ScoreFilter::new("m-9").join_payload(), json!({ "matchId": "m-9" }));
    }

    #[tokio::test]
    async fn joins_match_and_delivers_scores() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let mut frames = Vec::new();

            send_text(&mut ws, OPEN).await;
            frames.push(next_text(&mut ws).await.unwrap());
            send_text(&mut ws, r#"40{"sid":"n1"}"#).await;
            frames.push(next_text(&mut ws).await.unwrap());

            send_text(&mut ws, r#"42["score_update",{"matchId":"other","teamASets":[1],"teamBSets":[2]}]"#).await;
            send_text(
                &mut ws,
                r#"42["score_update",{"matchId":"m-1","teamASets":[25,20,5],"teamBSets":[20,25,3]}]"#,
            )
            .await;
            send_text(&mut ws, "2").await;

            while let Some(frame) = next_text(&mut ws).await {
                frames.push(frame);
            }
            frames
        });

        let (channel, mut events) = ScoreEventChannel::connect(options_for(addr), "m-1").unwrap();
        assert_eq!(recv(&mut events).await, Some(ChannelEvent::Connected));
        assert_eq!(
            recv(&mut events).await,
            Some(ChannelEvent::ScoreUpdated(ScoreState::new(5, 3, 1, 1)))
        );

        channel
            .emitter()
            .emit("low_battery", json!({ "matchId": "m-1", "battery": 25, "token": "t" }))
            .unwrap();
        // Give the emit and the pong time to go out before closing.
        tokio::time::sleep(Duration::from_millis(200)).await;
        channel.close().await;

        let frames = server.await.unwrap();
        assert_eq!(frames[0], "40");
        assert_eq!(frames[1], r#"42["join_match",{"matchId":"m-1"}]"#);
        assert!(frames.contains(&"3".to_string()));
        assert!(frames.contains(&"41".to_string()));

        let battery = frames
            .iter()
            .find_map(|frame| match EnginePacket::decode(frame) {
                Ok(EnginePacket::Message(SocketPacket::Event { name, args, .. })) if name == "low_battery" => {
                    Some(args)
                }
                _ => None,
            })
            .expect("low_battery emitted");
        assert_eq!(battery[0]["battery"], json!(25));
    }

    #[tokio::test]
    async fn rejected_connect_reports_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            send_text(&mut ws, OPEN).await;
            let _ = next_text(&mut ws).await;
            send_text(&mut ws, r#"44{"message":"Not authorized"}"#).await;
            let _ = next_text(&mut ws).await;
        });

        let (_channel, mut events) = ScoreEventChannel::connect(options_for(addr), "m-1").unwrap();
        assert_eq!(
            recv(&mut events).await,
            Some(ChannelEvent::ConnectError("Not authorized".to_string()))
        );
        assert_eq!(recv(&mut events).await, None);
    }

    #[tokio::test]
    async fn gives_up_after_bounded_retries() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let mut options = options_for(addr);
        options.reconnection = true;
        options.reconnection_attempts = 2;
        options.reconnection_delay = Duration::from_millis(10);

        let (channel, mut events) = ScoreEventChannel::connect(options, "m-1").unwrap();
        for _ in 0..3 {
            assert!(matches!(recv(&mut events).await, Some(ChannelEvent::ConnectError(_))));
        }
        assert_eq!(recv(&mut events).await, None);
        channel.close().await;
    }
}
