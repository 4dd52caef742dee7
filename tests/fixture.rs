//! Fixtures for the engine tests: scripted transports handing the test a
//! handle to play the server side of a session, and a handler recording
//! every callback.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use engineioxide_client::{
    Engine, EngineIoConfig, EngineIoHandler, Error, EventSink, Str, Transport, TransportEvent,
    TransportFactory, TransportType,
};
use http::HeaderMap;
use tokio::sync::mpsc;
use url::Url;

/// The session id every scripted handshake assigns
pub const SID: &str = "lv_VI97HAXpY6yYWAAAC";

pub fn base_url() -> Url {
    Url::parse("http://127.0.0.1:8080").unwrap()
}

/// The text of an open packet answering the handshake
pub fn open_packet(upgrades: &[&str], ping_interval: u64, ping_timeout: u64) -> Str {
    let handshake = serde_json::json!({
        "sid": SID,
        "upgrades": upgrades,
        "pingInterval": ping_interval,
        "pingTimeout": ping_timeout,
    });
    Str::from(format!("0{handshake}"))
}

/// Everything the engine can do to a transport, recorded in call order
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Text(Str),
    Binary(Bytes),
    UrlSet(Url),
    Closed,
}

/// The test side of a scripted transport: `sink` injects events as if the
/// transport received them, `actions` observes what the engine did to it
pub struct MockHandle {
    pub kind: TransportType,
    pub url: Url,
    pub sink: EventSink,
    pub actions: mpsc::UnboundedReceiver<Action>,
}

struct MockTransport {
    kind: TransportType,
    handle_tx: mpsc::UnboundedSender<MockHandle>,
    actions: Option<mpsc::UnboundedSender<Action>>,
}

impl Transport for MockTransport {
    fn kind(&self) -> TransportType {
        self.kind
    }

    fn open(&mut self, url: Url, _headers: &HeaderMap, _cookies: &[String], sink: EventSink) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.actions = Some(tx);
        self.handle_tx
            .send(MockHandle {
                kind: self.kind,
                url,
                sink,
                actions: rx,
            })
            .ok();
    }

    fn set_url(&mut self, url: Url) {
        if let Some(tx) = &self.actions {
            tx.send(Action::UrlSet(url)).ok();
        }
    }

    fn send_text(&mut self, data: Str) {
        if let Some(tx) = &self.actions {
            tx.send(Action::Text(data)).ok();
        }
    }

    fn send_binary(&mut self, data: Bytes) {
        if let Some(tx) = &self.actions {
            tx.send(Action::Binary(data)).ok();
        }
    }

    fn close(&mut self) {
        if let Some(tx) = self.actions.take() {
            tx.send(Action::Closed).ok();
        }
    }
}

/// Factory handing the test a [`MockHandle`] for every transport the engine
/// opens
#[derive(Debug, Clone)]
pub struct MockTransports {
    tx: mpsc::UnboundedSender<MockHandle>,
}

impl MockTransports {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MockHandle>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TransportFactory for MockTransports {
    fn polling(&self) -> Box<dyn Transport> {
        Box::new(MockTransport {
            kind: TransportType::Polling,
            handle_tx: self.tx.clone(),
            actions: None,
        })
    }
    fn websocket(&self) -> Box<dyn Transport> {
        Box::new(MockTransport {
            kind: TransportType::Websocket,
            handle_tx: self.tx.clone(),
            actions: None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connect,
    Disconnect(Str),
    Message(Str),
    Binary(Bytes),
    Error(String),
}

#[derive(Debug)]
pub struct RecordingHandler {
    tx: mpsc::Sender<Event>,
}

impl RecordingHandler {
    pub fn new() -> (Arc<Self>, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(100);
        (Arc::new(Self { tx }), rx)
    }
}

impl EngineIoHandler for RecordingHandler {
    fn on_connect(&self) {
        self.tx.try_send(Event::Connect).unwrap();
    }
    fn on_disconnect(&self, reason: Str) {
        self.tx.try_send(Event::Disconnect(reason)).unwrap();
    }
    fn on_message(&self, msg: Str) {
        self.tx.try_send(Event::Message(msg)).unwrap();
    }
    fn on_binary(&self, data: Bytes) {
        self.tx.try_send(Event::Binary(data)).unwrap();
    }
    fn on_error(&self, error: Error) {
        self.tx.try_send(Event::Error(error.to_string())).unwrap();
    }
}

pub async fn next_handle(handles: &mut mpsc::UnboundedReceiver<MockHandle>) -> MockHandle {
    tokio::time::timeout(Duration::from_millis(500), handles.recv())
        .await
        .expect("timeout waiting for a transport to open")
        .expect("engine gone before opening a transport")
}

pub async fn next_action(handle: &mut MockHandle) -> Action {
    tokio::time::timeout(Duration::from_millis(500), handle.actions.recv())
        .await
        .expect("timeout waiting for a transport action")
        .expect("transport dropped without a close")
}

pub async fn next_event(events: &mut mpsc::Receiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_millis(500), events.recv())
        .await
        .expect("timeout waiting for a handler event")
        .expect("handler event channel closed")
}

pub async fn expect_text(handle: &mut MockHandle) -> Str {
    match next_action(handle).await {
        Action::Text(data) => data,
        other => panic!("expected a text frame, got {other:?}"),
    }
}

/// An engine driven through the polling handshake, ready to exchange data.
///
/// The url update and connect notification of the handshake are already
/// consumed. When `upgrades` advertises the websocket, the probe candidate
/// is waiting unopened in `handles`.
pub struct Connected {
    pub engine: Engine,
    pub handler: Arc<RecordingHandler>,
    pub events: mpsc::Receiver<Event>,
    pub polling: MockHandle,
    pub handles: mpsc::UnboundedReceiver<MockHandle>,
}

pub async fn polling_session(config: EngineIoConfig, upgrades: &[&str]) -> Connected {
    let (handler, mut events) = RecordingHandler::new();
    let (factory, mut handles) = MockTransports::new();
    let engine = Engine::with_transports(base_url(), config, &handler, factory);
    engine.connect();

    let mut polling = next_handle(&mut handles).await;
    assert_eq!(polling.kind, TransportType::Polling);
    polling.sink.send(TransportEvent::Opened);
    polling
        .sink
        .send(TransportEvent::Text(open_packet(upgrades, 25000, 60000)));

    let action = next_action(&mut polling).await;
    assert!(matches!(action, Action::UrlSet(_)));
    assert_eq!(next_event(&mut events).await, Event::Connect);

    Connected {
        engine,
        handler,
        events,
        polling,
        handles,
    }
}
