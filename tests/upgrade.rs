//! Tests for the websocket upgrade:
//! * Probe exchange and transport swap
//! * Writes held during the probe and flushed in order
//! * Fallback to polling on probe failure and timeout
//! * Late events from replaced transports

mod fixture;

use std::time::Duration;

use engineioxide_client::{EngineIoConfig, TransportEvent, TransportType};
use fixture::{
    Action, Event, SID, expect_text, next_action, next_event, next_handle, polling_session,
};

#[tokio::test]
pub async fn successful_probe_swaps_to_websocket() {
    let mut s = polling_session(EngineIoConfig::default(), &["websocket"]).await;
    assert!(s.engine.is_probing());

    let mut ws = next_handle(&mut s.handles).await;
    assert_eq!(ws.kind, TransportType::Websocket);
    assert!(ws.url.query().unwrap().contains(&format!("sid={SID}")));

    ws.sink.send(TransportEvent::Opened);
    assert_eq!(expect_text(&mut ws).await, "2probe");
    ws.sink.send(TransportEvent::Text("3probe".into()));

    // the polling connection is released with a noop and closed
    assert_eq!(expect_text(&mut s.polling).await, "6");
    assert_eq!(next_action(&mut s.polling).await, Action::Closed);
    // the upgrade is confirmed on the websocket
    assert_eq!(expect_text(&mut ws).await, "5");

    assert_eq!(s.engine.transport(), Some(TransportType::Websocket));
    assert!(!s.engine.is_probing());

    s.engine.send("over websocket", Vec::new()).unwrap();
    assert_eq!(expect_text(&mut ws).await, "4over websocket");
}

#[tokio::test]
pub async fn writes_during_the_probe_are_flushed_to_websocket_in_order() {
    let mut s = polling_session(EngineIoConfig::default(), &["websocket"]).await;
    let mut ws = next_handle(&mut s.handles).await;
    ws.sink.send(TransportEvent::Opened);
    assert_eq!(expect_text(&mut ws).await, "2probe");

    s.engine.send("w1", Vec::new()).unwrap();
    s.engine.send("w2", Vec::new()).unwrap();
    s.engine.send("w3", Vec::new()).unwrap();

    ws.sink.send(TransportEvent::Text("3probe".into()));
    assert_eq!(expect_text(&mut ws).await, "5");
    assert_eq!(expect_text(&mut ws).await, "4w1");
    assert_eq!(expect_text(&mut ws).await, "4w2");
    assert_eq!(expect_text(&mut ws).await, "4w3");

    // nothing leaked to the polling transport
    assert_eq!(next_action(&mut s.polling).await, Action::Text("6".into()));
    assert_eq!(next_action(&mut s.polling).await, Action::Closed);
}

#[tokio::test]
pub async fn failed_probe_falls_back_to_polling_with_held_writes() {
    let mut s = polling_session(EngineIoConfig::default(), &["websocket"]).await;
    let mut ws = next_handle(&mut s.handles).await;
    ws.sink.send(TransportEvent::Opened);
    assert_eq!(expect_text(&mut ws).await, "2probe");

    s.engine.send("w1", Vec::new()).unwrap();
    s.engine.send("w2", Vec::new()).unwrap();

    ws.sink
        .send(TransportEvent::Error("connection reset".into()));

    assert_eq!(
        next_event(&mut s.events).await,
        Event::Error("upgrade probe rejected: connection reset".to_string())
    );
    assert_eq!(next_action(&mut ws).await, Action::Closed);
    assert_eq!(expect_text(&mut s.polling).await, "4w1");
    assert_eq!(expect_text(&mut s.polling).await, "4w2");
    assert_eq!(s.engine.transport(), Some(TransportType::Polling));
    assert!(!s.engine.is_probing());

    // the session stays healthy on polling
    s.engine.send("still here", Vec::new()).unwrap();
    assert_eq!(expect_text(&mut s.polling).await, "4still here");
}

#[tokio::test(start_paused = true)]
pub async fn probe_timeout_falls_back_to_polling() {
    let config = EngineIoConfig::builder()
        .probe_timeout(Duration::from_millis(50))
        .build();
    let mut s = polling_session(config, &["websocket"]).await;
    let mut ws = next_handle(&mut s.handles).await;
    ws.sink.send(TransportEvent::Opened);
    assert_eq!(expect_text(&mut ws).await, "2probe");
    s.engine.send("held", Vec::new()).unwrap();

    // the candidate never answers, virtual time runs out
    assert_eq!(
        next_event(&mut s.events).await,
        Event::Error("upgrade probe timed out".to_string())
    );
    assert_eq!(next_action(&mut ws).await, Action::Closed);
    assert_eq!(expect_text(&mut s.polling).await, "4held");
    assert_eq!(s.engine.transport(), Some(TransportType::Polling));
}

#[tokio::test]
pub async fn probe_answer_after_the_failure_is_ignored() {
    let mut s = polling_session(EngineIoConfig::default(), &["websocket"]).await;
    let mut ws = next_handle(&mut s.handles).await;
    ws.sink.send(TransportEvent::Opened);
    assert_eq!(expect_text(&mut ws).await, "2probe");

    ws.sink.send(TransportEvent::Error("connection reset".into()));
    assert_eq!(
        next_event(&mut s.events).await,
        Event::Error("upgrade probe rejected: connection reset".to_string())
    );

    // the late probe answer comes from a replaced transport
    ws.sink.send(TransportEvent::Text("3probe".into()));
    s.engine.send("after", Vec::new()).unwrap();
    assert_eq!(expect_text(&mut s.polling).await, "4after");
    assert_eq!(s.engine.transport(), Some(TransportType::Polling));
}

#[tokio::test]
pub async fn late_polling_events_after_the_upgrade_are_dropped() {
    let mut s = polling_session(EngineIoConfig::default(), &["websocket"]).await;
    let mut ws = next_handle(&mut s.handles).await;
    ws.sink.send(TransportEvent::Opened);
    assert_eq!(expect_text(&mut ws).await, "2probe");
    ws.sink.send(TransportEvent::Text("3probe".into()));
    assert_eq!(expect_text(&mut ws).await, "5");

    // the replaced polling transport speaks into the void
    s.polling.sink.send(TransportEvent::Text("4ghost".into()));
    s.polling
        .sink
        .send(TransportEvent::Closed("poll teardown".into()));
    ws.sink.send(TransportEvent::Text("4real".into()));

    assert_eq!(
        next_event(&mut s.events).await,
        Event::Message("real".into())
    );
    assert!(s.engine.is_connected());
}
