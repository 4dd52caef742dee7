//! The engine session: state machine, upgrade coordination and the serial
//! command loop.
//!
//! All mutable session state is owned by a single task consuming a command
//! channel. Public operations and transport events are messages on that
//! channel, so transitions never race and no lock guards the state. Timers
//! (heartbeat, probe deadline) are small helper tasks sending commands back,
//! their handles are aborted when they become irrelevant and their commands
//! carry generation ids so a late delivery cannot fire against a newer
//! probe.

use std::sync::{
    Arc, OnceLock, Weak,
    atomic::{AtomicBool, AtomicU8, Ordering},
};
use std::time::Duration;

use bytes::Bytes;
use smallvec::smallvec;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use crate::config::EngineIoConfig;
use crate::errors::Error;
use crate::handler::EngineIoHandler;
use crate::packet::{HandshakeData, Packet, PacketBuf, PacketType, RawFrame};
use crate::queue::{Enqueued, WriteEntry, WriteQueue};
use crate::sid::Sid;
use crate::str::Str;
use crate::transport::{
    DefaultTransports, EventSink, Transport, TransportEvent, TransportFactory, TransportType,
};
use crate::urls;
use crate::utf8;

/// A command consumed by the session task. Everything that can touch session
/// state arrives through this enum, in order.
#[derive(Debug)]
pub(crate) enum Command {
    Connect,
    Write(WriteEntry),
    Disconnect(Str),
    /// An event reported by the transport instance with the given id
    Transport(u64, TransportEvent),
    HeartbeatTick,
    /// The probe with the given generation id ran out of time
    ProbeTimeout(u64),
}

/// Handle to an engine.io client session.
///
/// The handle is cheap to clone and every method is non blocking: operations
/// are queued to the session task and applied in submission order. Dropping
/// the last handle closes the session.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use bytes::Bytes;
/// # use engineioxide_client::{Engine, EngineIoConfig, EngineIoHandler, Error, Str};
/// # #[derive(Debug, Default)]
/// # struct MyHandler;
/// # impl EngineIoHandler for MyHandler {
/// #     fn on_connect(&self) {}
/// #     fn on_disconnect(&self, reason: Str) {}
/// #     fn on_message(&self, msg: Str) {}
/// #     fn on_binary(&self, data: Bytes) {}
/// #     fn on_error(&self, error: Error) {}
/// # }
/// # #[tokio::main] async fn main() {
/// let handler = Arc::new(MyHandler::default());
/// let url = url::Url::parse("http://localhost:3000").unwrap();
/// let engine = Engine::new(url, EngineIoConfig::default(), &handler);
/// engine.connect();
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Engine {
    tx: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
    _guard: Arc<EngineGuard>,
}

/// Session state mirrored for the synchronous getters of [`Engine`]
#[derive(Debug, Default)]
struct Shared {
    /// Set exactly once, by the first open packet of the session
    sid: OnceLock<Sid>,
    connected: AtomicBool,
    closed: AtomicBool,
    /// Bits of the [`TransportType`] currently carrying the session
    transport: AtomicU8,
    probing: AtomicBool,
}

/// Closes the session when the last [`Engine`] handle is dropped
#[derive(Debug)]
struct EngineGuard {
    tx: mpsc::UnboundedSender<Command>,
}

impl Drop for EngineGuard {
    fn drop(&mut self) {
        self.tx
            .send(Command::Disconnect("engine handle dropped".into()))
            .ok();
    }
}

impl Engine {
    /// Create a session over the built in polling and websocket transports.
    ///
    /// Construction performs no i/o, the handshake only starts with
    /// [`connect`](Engine::connect). Must be called within a tokio runtime.
    /// The handler is referenced weakly: dropping it stops event delivery
    /// but does not close the session.
    pub fn new<H: EngineIoHandler>(url: Url, config: EngineIoConfig, handler: &Arc<H>) -> Self {
        Self::with_transports(url, config, handler, DefaultTransports)
    }

    /// Create a session with a custom [`TransportFactory`]
    pub fn with_transports<H: EngineIoHandler, F: TransportFactory>(
        url: Url,
        config: EngineIoConfig,
        handler: &Arc<H>,
        factory: F,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());
        let session = Session {
            base_url: url,
            config,
            handler: Arc::downgrade(handler),
            factory,
            shared: shared.clone(),
            tx: tx.clone(),
            rx,
            state: State::Disconnected,
            queue: WriteQueue::default(),
            current: None,
            candidate: None,
            next_transport_id: 0,
            probe_id: 0,
            probe_timer: None,
            heartbeat: None,
            pongs_missed: 0,
            pongs_missed_max: 0,
            decode_failures: 0,
        };
        tokio::spawn(session.run());
        Engine {
            tx: tx.clone(),
            shared,
            _guard: Arc::new(EngineGuard { tx }),
        }
    }

    /// Start the session handshake. A no-op once the session started or
    /// closed.
    pub fn connect(&self) {
        self.tx.send(Command::Connect).ok();
    }

    /// Queue a packet for delivery: one text frame of the given kind
    /// followed contiguously by one binary packet per `data` element.
    ///
    /// Writes issued while an upgrade probe is in flight are held back and
    /// flushed in order once the probe resolves.
    pub fn write(
        &self,
        msg: impl Into<Str>,
        kind: PacketType,
        data: Vec<Bytes>,
    ) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        let entry = WriteEntry {
            msg: msg.into(),
            kind,
            data,
        };
        self.tx
            .send(Command::Write(entry))
            .map_err(|_| Error::SessionClosed)
    }

    /// Queue a message packet for delivery, with one binary packet per
    /// `data` element following it contiguously
    pub fn send(&self, msg: impl Into<Str>, data: Vec<Bytes>) -> Result<(), Error> {
        self.write(msg, PacketType::Message, data)
    }

    /// Close the session with the given reason. Idempotent: only the first
    /// call tears the session down and notifies the handler.
    pub fn disconnect(&self, reason: impl Into<Str>) {
        self.tx.send(Command::Disconnect(reason.into())).ok();
    }

    /// The session id assigned by the server, empty until the handshake
    /// completed
    pub fn sid(&self) -> Sid {
        self.shared.sid.get().cloned().unwrap_or_default()
    }

    /// Whether the handshake completed and the session was not closed since
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Relaxed)
    }

    /// Whether the session reached its terminal state
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Relaxed)
    }

    /// The transport currently carrying the session
    pub fn transport(&self) -> Option<TransportType> {
        match self.shared.transport.load(Ordering::Relaxed) {
            t if t == TransportType::Polling as u8 => Some(TransportType::Polling),
            t if t == TransportType::Websocket as u8 => Some(TransportType::Websocket),
            _ => None,
        }
    }

    /// Whether an upgrade probe is currently in flight
    pub fn is_probing(&self) -> bool {
        self.shared.probing.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Disconnected,
    Connecting,
    Polling,
    Probing,
    WebSocketActive,
    Closed,
}

/// A live transport instance and the id its events are tagged with
struct ActiveTransport {
    id: u64,
    transport: Box<dyn Transport>,
}

/// The session task: sole owner of all mutable session state
struct Session<H, F> {
    base_url: Url,
    config: EngineIoConfig,
    handler: Weak<H>,
    factory: F,
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<Command>,
    rx: mpsc::UnboundedReceiver<Command>,

    state: State,
    queue: WriteQueue,
    current: Option<ActiveTransport>,
    candidate: Option<ActiveTransport>,
    next_transport_id: u64,
    /// Generation counter invalidating probe timers of resolved probes
    probe_id: u64,
    probe_timer: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    pongs_missed: u32,
    pongs_missed_max: u32,
    /// Consecutive decode failures on the active transport
    decode_failures: u8,
}

impl<H: EngineIoHandler, F: TransportFactory> Session<H, F> {
    async fn run(mut self) {
        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                Command::Connect => self.handle_connect(),
                Command::Write(entry) => self.handle_write(entry),
                Command::Disconnect(reason) => self.handle_disconnect(reason),
                Command::Transport(id, event) => self.handle_transport_event(id, event),
                Command::HeartbeatTick => self.handle_heartbeat_tick(),
                Command::ProbeTimeout(probe_id) => self.handle_probe_timeout(probe_id),
            }
            if self.state == State::Closed {
                break;
            }
        }
    }

    fn handle_connect(&mut self) {
        if self.state != State::Disconnected {
            debug!("connect ignored, session already started");
            return;
        }
        self.state = State::Connecting;
        let kind = if self.config.force_websockets {
            TransportType::Websocket
        } else {
            TransportType::Polling
        };
        debug!(transport = %kind, "starting session handshake");
        self.current = Some(self.open_transport(kind));
        self.shared.transport.store(kind as u8, Ordering::Relaxed);
    }

    fn handle_write(&mut self, entry: WriteEntry) {
        match self.state {
            State::Polling | State::Probing | State::WebSocketActive => {}
            _ => {
                debug!("write dropped, session not connected");
                return;
            }
        }
        match self.queue.push(entry) {
            Enqueued::Dispatch(entry) => self.dispatch_entry(entry),
            Enqueued::Held => debug!("write held behind the upgrade probe"),
        }
    }

    fn handle_disconnect(&mut self, reason: Str) {
        self.teardown(reason, true);
    }

    /// Tear the session down. `notify_server` sends a polite close packet
    /// first, callers reacting to a peer that already ended the session
    /// skip it.
    fn teardown(&mut self, reason: Str, notify_server: bool) {
        if self.state == State::Closed {
            debug!("disconnect ignored, session already closed");
            return;
        }
        debug!(sid = %self.sid(), %reason, "closing session");
        self.abort_probe();
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
        self.queue.clear();
        let was_connected = self.shared.connected.load(Ordering::Relaxed);
        if was_connected && notify_server {
            // delivery is best effort, the transport may already be gone
            self.send_packets(smallvec![Packet::Close]);
        }
        if let Some(mut active) = self.current.take() {
            active.transport.close();
        }
        self.state = State::Closed;
        self.shared.connected.store(false, Ordering::Relaxed);
        self.shared.closed.store(true, Ordering::Relaxed);
        self.shared.probing.store(false, Ordering::Relaxed);
        if let Some(handler) = self.handler.upgrade() {
            handler.on_disconnect(reason);
        }
    }

    /// An unrecoverable failure: report it, then force the session down
    fn did_error(&mut self, error: Error) {
        let reason = Str::from(error.to_string());
        warn!(sid = %self.sid(), "session error: {error}");
        if let Some(handler) = self.handler.upgrade() {
            handler.on_error(error);
        }
        self.handle_disconnect(reason);
    }

    fn handle_transport_event(&mut self, id: u64, event: TransportEvent) {
        if self.candidate.as_ref().is_some_and(|t| t.id == id) {
            self.handle_candidate_event(event);
        } else if self.current.as_ref().is_some_and(|t| t.id == id) {
            self.handle_current_event(event);
        } else {
            debug!(id, "dropping event from a replaced transport");
        }
    }

    fn handle_current_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => {
                debug!(sid = %self.sid(), "transport opened");
            }
            TransportEvent::Text(data) => self.handle_incoming_text(data),
            TransportEvent::Binary(data) => self.handle_incoming_binary(data),
            TransportEvent::Closed(reason) => {
                let reason = if reason.is_empty() {
                    Str::from("transport closed")
                } else {
                    reason
                };
                self.teardown(reason, false);
            }
            TransportEvent::Error(reason) => self.did_error(Error::TransportFailure(reason)),
        }
    }

    fn handle_candidate_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => {
                debug!(sid = %self.sid(), "websocket candidate opened, probing");
                if let Some(candidate) = self.candidate.as_mut() {
                    candidate
                        .transport
                        .send_text(String::from(Packet::PingUpgrade).into());
                }
            }
            TransportEvent::Text(data) => match Packet::try_from(data) {
                Ok(Packet::PongUpgrade) => self.complete_upgrade(),
                Ok(packet) => {
                    debug!(?packet, "unexpected packet from the websocket candidate")
                }
                Err(e) => self.probe_failed(Error::ProbeRejected(e.to_string().into())),
            },
            TransportEvent::Binary(_) => {
                debug!("unexpected binary frame from the websocket candidate")
            }
            TransportEvent::Closed(reason) | TransportEvent::Error(reason) => {
                self.probe_failed(Error::ProbeRejected(reason));
            }
        }
    }

    /// Decode a text frame from the active transport and dispatch the packet
    fn handle_incoming_text(&mut self, data: Str) {
        let from_polling = self
            .current
            .as_ref()
            .is_some_and(|t| t.transport.kind() == TransportType::Polling);
        let data = if from_polling && self.config.double_encode_utf8 {
            utf8::undo_double_encode(data)
        } else {
            data
        };
        match Packet::try_from(data) {
            Ok(packet) => {
                self.decode_failures = 0;
                self.handle_packet(packet);
            }
            Err(e) => self.decode_failure(e),
        }
    }

    fn handle_incoming_binary(&mut self, data: Bytes) {
        match Packet::try_from_binary(data) {
            Ok(packet) => {
                self.decode_failures = 0;
                self.handle_packet(packet);
            }
            Err(e) => self.decode_failure(e),
        }
    }

    /// A malformed frame was dropped. Three in a row mean the transport
    /// itself is compromised and the session is torn down.
    fn decode_failure(&mut self, error: Error) {
        self.decode_failures += 1;
        debug!(
            failures = self.decode_failures,
            "dropping malformed packet: {error}"
        );
        if let Some(handler) = self.handler.upgrade() {
            handler.on_error(error);
        }
        if self.decode_failures >= 3 {
            self.did_error(Error::TransportFailure(
                "three consecutive malformed packets".into(),
            ));
        }
    }

    fn handle_packet(&mut self, packet: Packet) {
        match packet {
            Packet::Open(payload) => self.handle_open(payload),
            Packet::Close => self.teardown("close packet received".into(), false),
            Packet::Ping(payload) => {
                // echo the payload back, the write path holds it correctly
                // while a probe is in flight
                self.handle_write(WriteEntry {
                    msg: payload,
                    kind: PacketType::Pong,
                    data: Vec::new(),
                });
            }
            Packet::Pong(_) => self.pongs_missed = 0,
            Packet::Message(msg) => {
                if let Some(handler) = self.handler.upgrade() {
                    handler.on_message(msg);
                }
            }
            Packet::Binary(data) => {
                if let Some(handler) = self.handler.upgrade() {
                    handler.on_binary(data);
                }
            }
            Packet::Upgrade | Packet::Noop => {
                debug!(sid = %self.sid(), ?packet, "control packet ignored")
            }
            Packet::PingUpgrade | Packet::PongUpgrade => {
                debug!(sid = %self.sid(), ?packet, "probe packet outside of a probe ignored")
            }
        }
    }

    fn handle_open(&mut self, payload: Str) {
        if self.shared.sid.get().is_some() {
            warn!(sid = %self.sid(), "duplicate open packet dropped");
            return;
        }
        let handshake = match HandshakeData::parse(&payload) {
            Ok(handshake) => handshake,
            Err(e) => return self.did_error(e),
        };
        debug!(sid = %handshake.sid, "session handshake completed");
        self.shared.sid.set(handshake.sid.clone()).ok();
        self.shared.connected.store(true, Ordering::Relaxed);

        // from now on the polling url carries the session id
        if let Some(active) = self.current.as_mut() {
            let url = match active.transport.kind() {
                TransportType::Polling => {
                    urls::polling_url(&self.base_url, &self.config, &handshake.sid)
                }
                TransportType::Websocket => {
                    urls::websocket_url(&self.base_url, &self.config, &handshake.sid)
                }
            };
            active.transport.set_url(url);
        }

        let on_websocket = self
            .current
            .as_ref()
            .is_some_and(|t| t.transport.kind() == TransportType::Websocket);
        self.state = if on_websocket {
            State::WebSocketActive
        } else {
            State::Polling
        };
        self.start_heartbeat(&handshake);

        let upgradable = self.state == State::Polling
            && !self.config.force_polling
            && handshake.supports_websocket();
        if let Some(handler) = self.handler.upgrade() {
            handler.on_connect();
        }
        if upgradable {
            self.begin_upgrade();
        }
    }

    /// Open a websocket candidate next to the polling transport and hold all
    /// writes until it proved itself
    fn begin_upgrade(&mut self) {
        debug!(sid = %self.sid(), "starting websocket upgrade probe");
        self.state = State::Probing;
        self.shared.probing.store(true, Ordering::Relaxed);
        self.queue.hold();
        self.candidate = Some(self.open_transport(TransportType::Websocket));

        self.probe_id += 1;
        let probe_id = self.probe_id;
        let timeout = self.config.probe_timeout;
        let tx = self.tx.clone();
        self.probe_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            tx.send(Command::ProbeTimeout(probe_id)).ok();
        }));
    }

    fn handle_probe_timeout(&mut self, probe_id: u64) {
        if probe_id != self.probe_id || self.state != State::Probing {
            debug!(probe_id, "stale probe timer ignored");
            return;
        }
        self.probe_failed(Error::ProbeTimeout);
    }

    /// The candidate answered the probe: swap it in and release held writes
    fn complete_upgrade(&mut self) {
        let Some(candidate) = self.candidate.take() else {
            return;
        };
        self.abort_probe_timer();
        debug!(sid = %self.sid(), "probe succeeded, upgrading to websocket");

        // release the pending polling request on the server side
        self.send_packets(smallvec![Packet::Noop]);
        if let Some(mut old) = self.current.replace(candidate) {
            old.transport.close();
        }
        self.state = State::WebSocketActive;
        self.shared
            .transport
            .store(TransportType::Websocket as u8, Ordering::Relaxed);
        self.shared.probing.store(false, Ordering::Relaxed);
        self.decode_failures = 0;

        // confirm the upgrade, then flush what was held, in order
        self.send_packets(smallvec![Packet::Upgrade]);
        for entry in self.queue.release() {
            self.dispatch_entry(entry);
        }
    }

    /// The candidate failed: stay on polling and release held writes there.
    /// Never fatal for the session.
    fn probe_failed(&mut self, error: Error) {
        debug!(sid = %self.sid(), "probe failed: {error}");
        self.abort_probe();
        self.state = State::Polling;
        if let Some(handler) = self.handler.upgrade() {
            handler.on_error(error);
        }
        for entry in self.queue.release() {
            self.dispatch_entry(entry);
        }
    }

    /// Drop the candidate and invalidate the probe timer
    fn abort_probe(&mut self) {
        self.abort_probe_timer();
        self.shared.probing.store(false, Ordering::Relaxed);
        if let Some(mut candidate) = self.candidate.take() {
            candidate.transport.close();
        }
    }

    fn abort_probe_timer(&mut self) {
        self.probe_id += 1;
        if let Some(timer) = self.probe_timer.take() {
            timer.abort();
        }
    }

    fn start_heartbeat(&mut self, handshake: &HandshakeData) {
        let interval = Duration::from_millis(handshake.ping_interval.max(1));
        let timeout = Duration::from_millis(handshake.ping_timeout);
        self.pongs_missed = 0;
        self.pongs_missed_max =
            ((timeout.as_millis() / interval.as_millis()).max(1)) as u32;
        debug!(
            sid = %self.sid(),
            ?interval,
            max_missed = self.pongs_missed_max,
            "heartbeat started"
        );
        let tx = self.tx.clone();
        self.heartbeat = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // the first tick of an interval fires immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if tx.send(Command::HeartbeatTick).is_err() {
                    break;
                }
            }
        }));
    }

    fn handle_heartbeat_tick(&mut self) {
        match self.state {
            State::Polling | State::Probing | State::WebSocketActive => {}
            _ => return,
        }
        if self.pongs_missed > self.pongs_missed_max {
            self.did_error(Error::TransportFailure("ping timeout".into()));
            return;
        }
        self.pongs_missed += 1;
        self.handle_write(WriteEntry {
            msg: Str::default(),
            kind: PacketType::Ping,
            data: Vec::new(),
        });
    }

    /// Expand a write entry into its contiguous packet batch and send it
    fn dispatch_entry(&mut self, entry: WriteEntry) {
        let packet = match entry.kind {
            PacketType::Open => Packet::Open(entry.msg),
            PacketType::Close => Packet::Close,
            PacketType::Ping => Packet::Ping(entry.msg),
            PacketType::Pong => Packet::Pong(entry.msg),
            PacketType::Message => Packet::Message(entry.msg),
            PacketType::Upgrade => Packet::Upgrade,
            PacketType::Noop => Packet::Noop,
        };
        let mut packets: PacketBuf = smallvec![packet];
        packets.extend(entry.data.into_iter().map(Packet::Binary));
        self.send_packets(packets);
    }

    /// Frame packets for the active transport and hand them over as one
    /// uninterrupted sequence
    fn send_packets(&mut self, packets: PacketBuf) {
        let Some(active) = self.current.as_mut() else {
            debug!("no active transport, {} packet(s) dropped", packets.len());
            return;
        };
        let kind = active.transport.kind();
        let double_encode = self.config.double_encode_utf8 && kind == TransportType::Polling;
        for packet in packets {
            let frame = match packet.encode(kind) {
                RawFrame::Text(text) if double_encode => {
                    RawFrame::Text(Str::from(utf8::apply_double_encode(&text)))
                }
                frame => frame,
            };
            active.transport.send_frame(frame);
        }
    }

    /// Create a transport of the given kind and open it against the session
    /// url derived for it
    fn open_transport(&mut self, kind: TransportType) -> ActiveTransport {
        let id = self.next_transport_id;
        self.next_transport_id += 1;
        let mut transport = match kind {
            TransportType::Polling => self.factory.polling(),
            TransportType::Websocket => self.factory.websocket(),
        };
        let sid = self.sid();
        let url = match kind {
            TransportType::Polling => urls::polling_url(&self.base_url, &self.config, &sid),
            TransportType::Websocket => urls::websocket_url(&self.base_url, &self.config, &sid),
        };
        let sink = EventSink::new(id, self.tx.clone());
        transport.open(
            url,
            &self.config.extra_headers,
            &self.config.cookies,
            sink,
        );
        ActiveTransport { id, transport }
    }

    fn sid(&self) -> Sid {
        self.shared.sid.get().cloned().unwrap_or_default()
    }
}
