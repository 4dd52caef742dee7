//! Tests for session teardown:
//! * Idempotent disconnect with a single notification
//! * Server initiated close and transport loss
//! * Closed sessions rejecting writes
//! * The guard closing the session with the last handle
//! * Sessions outliving their handler

mod fixture;

use engineioxide_client::{Engine, EngineIoConfig, Error, TransportEvent};
use fixture::{
    Action, Event, MockTransports, RecordingHandler, base_url, expect_text, next_action,
    next_event, next_handle, open_packet, polling_session,
};
use tokio::sync::mpsc;

#[tokio::test]
pub async fn disconnect_notifies_exactly_once() {
    let mut s = polling_session(EngineIoConfig::default(), &[]).await;
    s.engine.disconnect("bye");
    s.engine.disconnect("again");

    // the polite close packet goes out before the transport is torn down
    assert_eq!(expect_text(&mut s.polling).await, "1");
    assert_eq!(next_action(&mut s.polling).await, Action::Closed);
    assert_eq!(
        next_event(&mut s.events).await,
        Event::Disconnect("bye".into())
    );
    assert!(s.engine.is_closed());
    assert!(!s.engine.is_connected());

    // the second disconnect went nowhere
    tokio::task::yield_now().await;
    assert!(s.events.try_recv().is_err());
}

#[tokio::test]
pub async fn writes_after_the_close_are_rejected() {
    let mut s = polling_session(EngineIoConfig::default(), &[]).await;
    s.engine.disconnect("bye");
    assert_eq!(
        next_event(&mut s.events).await,
        Event::Disconnect("bye".into())
    );

    let err = s.engine.send("too late", Vec::new()).unwrap_err();
    assert!(matches!(err, Error::SessionClosed));

    // reconnecting a closed session is a no-op
    s.engine.connect();
    tokio::task::yield_now().await;
    assert!(s.handles.try_recv().is_err());
}

#[tokio::test]
pub async fn server_close_packet_closes_the_session() {
    let mut s = polling_session(EngineIoConfig::default(), &[]).await;
    s.polling.sink.send(TransportEvent::Text("1".into()));

    // the server ended the session, no close packet is echoed back
    assert_eq!(next_action(&mut s.polling).await, Action::Closed);
    assert_eq!(
        next_event(&mut s.events).await,
        Event::Disconnect("close packet received".into())
    );
}

#[tokio::test]
pub async fn transport_close_tears_the_session_down() {
    let mut s = polling_session(EngineIoConfig::default(), &[]).await;
    s.polling
        .sink
        .send(TransportEvent::Closed("server gone".into()));

    assert_eq!(next_action(&mut s.polling).await, Action::Closed);
    assert_eq!(
        next_event(&mut s.events).await,
        Event::Disconnect("server gone".into())
    );
}

#[tokio::test]
pub async fn transport_close_without_a_reason_gets_a_default() {
    let mut s = polling_session(EngineIoConfig::default(), &[]).await;
    s.polling.sink.send(TransportEvent::Closed("".into()));

    assert_eq!(
        next_event(&mut s.events).await,
        Event::Disconnect("transport closed".into())
    );
}

#[tokio::test]
pub async fn transport_error_reports_then_closes() {
    let mut s = polling_session(EngineIoConfig::default(), &[]).await;
    s.polling
        .sink
        .send(TransportEvent::Error("http status 503".into()));

    assert_eq!(
        next_event(&mut s.events).await,
        Event::Error("transport failure: http status 503".to_string())
    );
    assert_eq!(
        next_event(&mut s.events).await,
        Event::Disconnect("transport failure: http status 503".into())
    );
    assert!(s.engine.is_closed());
}

#[tokio::test]
pub async fn dropping_the_last_handle_closes_the_session() {
    let mut s = polling_session(EngineIoConfig::default(), &[]).await;

    let clone = s.engine.clone();
    drop(clone);
    tokio::task::yield_now().await;
    // a dropped clone changes nothing while another handle lives
    assert!(s.events.try_recv().is_err());

    drop(s.engine);
    assert_eq!(
        next_event(&mut s.events).await,
        Event::Disconnect("engine handle dropped".into())
    );
}

#[tokio::test]
pub async fn the_session_outlives_a_dropped_handler() {
    let mut s = polling_session(EngineIoConfig::default(), &[]).await;
    drop(s.handler);

    s.polling
        .sink
        .send(TransportEvent::Text("4nobody listens".into()));
    s.engine.send("still flows", Vec::new()).unwrap();
    assert_eq!(expect_text(&mut s.polling).await, "4still flows");

    // the handler channel closed without delivering anything
    assert!(matches!(
        s.events.try_recv(),
        Err(mpsc::error::TryRecvError::Disconnected)
    ));
}

#[tokio::test]
pub async fn handler_dropped_before_connect_delivers_no_events() {
    let (handler, mut events) = RecordingHandler::new();
    let (factory, mut handles) = MockTransports::new();
    let engine = Engine::with_transports(base_url(), EngineIoConfig::default(), &handler, factory);
    drop(handler);

    engine.connect();
    let mut polling = next_handle(&mut handles).await;
    polling.sink.send(TransportEvent::Opened);
    polling
        .sink
        .send(TransportEvent::Text(open_packet(&[], 25000, 60000)));

    // the handshake completes and data flows on the wire as usual
    assert!(matches!(next_action(&mut polling).await, Action::UrlSet(_)));
    engine.send("hello", Vec::new()).unwrap();
    assert_eq!(expect_text(&mut polling).await, "4hello");
    assert!(engine.is_connected());

    // the connect notification went nowhere, the handler was already gone
    assert!(matches!(
        events.try_recv(),
        Err(mpsc::error::TryRecvError::Disconnected)
    ));
}

#[tokio::test]
pub async fn disconnect_before_connect_still_notifies() {
    let (handler, mut events) = RecordingHandler::new();
    let (factory, mut handles) = MockTransports::new();
    let engine = Engine::with_transports(base_url(), EngineIoConfig::default(), &handler, factory);

    engine.disconnect("never mind");
    assert_eq!(
        next_event(&mut events).await,
        Event::Disconnect("never mind".into())
    );
    assert!(engine.is_closed());

    engine.connect();
    tokio::task::yield_now().await;
    assert!(handles.try_recv().is_err());
}
