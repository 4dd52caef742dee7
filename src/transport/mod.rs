//! Physical transports and the capability surface the engine drives them
//! through.
//!
//! A transport only moves raw frames: everything protocol related (packet
//! framing, upgrades, heartbeats) stays in the engine. Two implementations
//! are provided, http long-polling and websocket, and an embedder can plug
//! its own by implementing [`Transport`] and [`TransportFactory`].

use bytes::Bytes;
use http::HeaderMap;
use url::Url;

use crate::engine::Command;
use crate::packet::RawFrame;
use crate::str::Str;

pub mod polling;
pub mod ws;

/// The transport type of a connection, represented as a bitfield so the
/// current transport of a session can be mirrored in a single atomic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportType {
    /// Http long-polling transport
    Polling = 0x01,
    /// Websocket transport
    Websocket = 0x02,
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportType::Polling => f.write_str("polling"),
            TransportType::Websocket => f.write_str("websocket"),
        }
    }
}

/// An event a transport reports back to its engine.
///
/// Events are a one way stream: a transport never blocks on the engine and
/// never sees an answer, the engine reacts by calling back into the
/// [`Transport`] interface.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The physical connection is established, frames can flow
    Opened,
    /// A text frame arrived
    Text(Str),
    /// A binary frame arrived
    Binary(Bytes),
    /// The peer or the connection layer closed the transport
    Closed(Str),
    /// The transport failed with a description of the failure
    Error(Str),
}

/// The channel a transport instance reports its events through.
///
/// Every event is tagged with the id of the issuing instance: a replaced
/// transport usually keeps running for a short while and its late events must
/// not disturb the session, the engine drops everything tagged with a stale
/// id.
#[derive(Debug, Clone)]
pub struct EventSink {
    id: u64,
    tx: tokio::sync::mpsc::UnboundedSender<Command>,
}

impl EventSink {
    pub(crate) fn new(id: u64, tx: tokio::sync::mpsc::UnboundedSender<Command>) -> Self {
        Self { id, tx }
    }

    /// Report an event to the engine. Sending never blocks and silently does
    /// nothing once the engine is gone.
    pub fn send(&self, event: TransportEvent) {
        self.tx.send(Command::Transport(self.id, event)).ok();
    }
}

/// A physical connection able to carry engine.io frames.
///
/// All methods are non blocking: `open` establishes the connection in the
/// background and reports [`TransportEvent::Opened`] on the sink, the send
/// methods enqueue and the transport delivers in order.
pub trait Transport: Send + 'static {
    /// The kind of the transport
    fn kind(&self) -> TransportType;

    /// Establish the physical connection to `url`. `headers` and `cookies`
    /// are forwarded verbatim to the underlying protocol client.
    fn open(&mut self, url: Url, headers: &HeaderMap, cookies: &[String], sink: EventSink);

    /// Replace the url used for subsequent requests.
    ///
    /// Only meaningful for connection-less transports: polling re-derives its
    /// request url once the session id is known, a websocket keeps the url it
    /// connected with.
    fn set_url(&mut self, url: Url);

    /// Queue a text frame for delivery
    fn send_text(&mut self, data: Str);

    /// Queue a binary frame for delivery
    fn send_binary(&mut self, data: Bytes);

    /// Tear the physical connection down. Frames queued before the call are
    /// delivered best effort.
    fn close(&mut self);

    /// Send an already framed packet, dispatching on the frame kind
    fn send_frame(&mut self, frame: RawFrame) {
        match frame {
            RawFrame::Text(data) => self.send_text(data),
            RawFrame::Binary(data) => self.send_binary(data),
        }
    }
}

/// Factory for the two transport roles of a session.
///
/// The engine creates at most one polling transport and, per upgrade
/// attempt, one websocket candidate.
pub trait TransportFactory: Send + Sync + 'static {
    /// Create the polling transport carrying the session handshake
    fn polling(&self) -> Box<dyn Transport>;
    /// Create a websocket transport, either a probe candidate or the
    /// primary transport of a forced websocket session
    fn websocket(&self) -> Box<dyn Transport>;
}

/// Factory producing the built in [`polling::PollingTransport`] and
/// [`ws::WsTransport`]
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTransports;

impl TransportFactory for DefaultTransports {
    fn polling(&self) -> Box<dyn Transport> {
        Box::new(polling::PollingTransport::default())
    }
    fn websocket(&self) -> Box<dyn Transport> {
        Box::new(ws::WsTransport::default())
    }
}
