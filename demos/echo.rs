//! A small echo client: connect to an engine.io v3 server, send one message
//! per second and print everything that comes back.
//!
//! Point it at any engine.io v3 server:
//! `cargo run --example echo -- http://127.0.0.1:3000`

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use engineioxide_client::{Engine, EngineIoConfig, EngineIoHandler, Error, Str};
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug)]
struct EchoHandler;

impl EngineIoHandler for EchoHandler {
    fn on_connect(&self) {
        info!("session connected");
    }
    fn on_disconnect(&self, reason: Str) {
        info!("session closed: {reason}");
    }
    fn on_message(&self, msg: Str) {
        info!("message: {msg}");
    }
    fn on_binary(&self, data: Bytes) {
        info!("binary: {data:?}");
    }
    fn on_error(&self, error: Error) {
        warn!("engine error: {error}");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://127.0.0.1:3000".to_string());
    let handler = Arc::new(EchoHandler);
    let engine = Engine::new(url::Url::parse(&url)?, EngineIoConfig::default(), &handler);
    engine.connect();

    let mut n = 0u32;
    while !engine.is_closed() {
        tokio::time::sleep(Duration::from_secs(1)).await;
        if engine.is_connected() {
            n += 1;
            engine.send(format!("hello {n}"), Vec::new())?;
        }
    }
    Ok(())
}
