use crate::str::Str;

/// All the errors that can occur during the lifetime of a session.
///
/// Codec errors are recoverable, the faulty packet is dropped. Transport and
/// probe errors are reported through
/// [`on_error`](crate::handler::EngineIoHandler::on_error) and only transport
/// failures on the active transport tear the session down.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The frame does not start with a known packet type tag.
    /// Carries the offending character when there is one
    #[error("invalid packet type: {0:?}")]
    InvalidPacketType(Option<char>),

    /// A `b4` packet carries a payload that is not valid base64
    #[error("error decoding base64 packet payload: {0:?}")]
    InvalidPayloadEncoding(#[from] base64::DecodeError),

    /// A polling payload length prefix does not match its body
    #[error("invalid length prefix in polling payload")]
    InvalidPayloadLength,

    /// The open packet payload is not a valid handshake document
    #[error("error parsing handshake json: {0:?}")]
    InvalidHandshake(#[from] serde_json::Error),

    /// A text frame is not valid utf8
    #[error("invalid utf8 in text frame: {0:?}")]
    Utf8(#[from] std::str::Utf8Error),

    /// The active transport failed and the session went down with it
    #[error("transport failure: {0}")]
    TransportFailure(Str),

    /// The websocket candidate did not answer the probe in time
    #[error("upgrade probe timed out")]
    ProbeTimeout,

    /// The websocket candidate failed before answering the probe
    #[error("upgrade probe rejected: {0}")]
    ProbeRejected(Str),

    /// The operation was submitted to a session that already closed
    #[error("operation on a closed session")]
    SessionClosed,
}
