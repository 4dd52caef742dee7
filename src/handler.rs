//! ## An [`EngineIoHandler`] to get event calls from an engine.io session
//! #### Example :
//! ```rust
//! # use bytes::Bytes;
//! # use engineioxide_client::{EngineIoHandler, Error, Str};
//! # use std::sync::atomic::{AtomicUsize, Ordering};
//! #[derive(Debug, Default)]
//! struct MyHandler {
//!     msg_cnt: AtomicUsize,
//! }
//!
//! impl EngineIoHandler for MyHandler {
//!     fn on_connect(&self) {
//!         println!("session opened");
//!     }
//!     fn on_disconnect(&self, reason: Str) {
//!         println!("session closed: {reason}");
//!     }
//!     fn on_message(&self, msg: Str) {
//!         self.msg_cnt.fetch_add(1, Ordering::Relaxed);
//!     }
//!     fn on_binary(&self, data: Bytes) { }
//!     fn on_error(&self, error: Error) {
//!         eprintln!("engine error: {error}");
//!     }
//! }
//! ```
use std::sync::Arc;

use bytes::Bytes;

use crate::errors::Error;
use crate::str::Str;

/// The [`EngineIoHandler`] trait can be implemented on any struct to receive
/// session events.
///
/// The engine only holds a [`Weak`](std::sync::Weak) reference to its
/// handler: a handler dropped by the embedder silently stops receiving events
/// and never keeps the session alive on its own.
pub trait EngineIoHandler: Send + Sync + 'static {
    /// Called once the handshake completed and the session can carry data.
    fn on_connect(&self);

    /// Called exactly once when the session reaches its terminal state.
    fn on_disconnect(&self, reason: Str);

    /// Called for every message packet received from the server.
    fn on_message(&self, msg: Str);

    /// Called for every binary packet received from the server, whichever
    /// framing it arrived in.
    fn on_binary(&self, data: Bytes);

    /// Called for recoverable failures: dropped packets, rejected upgrade
    /// probes and transport errors. A transport failure on the active
    /// transport is followed by [`on_disconnect`](EngineIoHandler::on_disconnect).
    fn on_error(&self, error: Error);
}

impl<T: EngineIoHandler> EngineIoHandler for Arc<T> {
    fn on_connect(&self) {
        (**self).on_connect()
    }
    fn on_disconnect(&self, reason: Str) {
        (**self).on_disconnect(reason)
    }
    fn on_message(&self, msg: Str) {
        (**self).on_message(msg)
    }
    fn on_binary(&self, data: Bytes) {
        (**self).on_binary(data)
    }
    fn on_error(&self, error: Error) {
        (**self).on_error(error)
    }
}
