use base64::{Engine, engine::general_purpose};
use bytes::Bytes;
use serde::Deserialize;
use smallvec::SmallVec;

use crate::errors::Error;
use crate::sid::Sid;
use crate::str::Str;
use crate::transport::TransportType;

/// A Packet type to use when receiving and sending data to the server
#[derive(Debug, Clone, PartialEq, PartialOrd)]
pub enum Packet {
    /// Open packet received at the end of the handshake, its payload is the
    /// raw handshake json to be parsed with [`HandshakeData::parse`]
    Open(Str),
    /// Close packet used to close the session from either side
    Close,
    /// Ping packet used to check if the connection is still alive.
    /// With the protocol revision implemented here the client sends it
    Ping(Str),
    /// Pong packet used to respond to a Ping packet
    Pong(Str),

    /// Special Ping packet sent on the websocket candidate to probe it
    PingUpgrade,
    /// Special Pong packet answering a PingUpgrade, it validates the candidate
    PongUpgrade,

    /// Message packet used to exchange data with the server
    Message(Str),
    /// Upgrade packet sent on the websocket once the probe succeeded
    Upgrade,

    /// Noop packet. Sent to the polling connection during the upgrade so the
    /// server releases any pending polling request
    Noop,

    /// Binary packet used to exchange binary data with the server.
    /// Converts to a `b4` prefixed base64 string on a polling connection
    /// or to a websocket binary frame with a leading message type byte
    Binary(Bytes),
}

/// The frame actually written to a physical transport.
///
/// Both renditions of the same [`Packet::Binary`] payload decode back to the
/// same bytes, only the framing differs per transport.
#[derive(Debug, Clone, PartialEq)]
pub enum RawFrame {
    /// A text frame, `<type digit><payload>` or `b4<base64>`
    Text(Str),
    /// A websocket binary frame, `0x04` followed by the raw payload
    Binary(Bytes),
}

/// The wire type tag of a packet, the leading digit of its text framing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// Open packet type
    Open = 0,
    /// Close packet type
    Close = 1,
    /// Ping packet type
    Ping = 2,
    /// Pong packet type
    Pong = 3,
    /// Message packet type
    Message = 4,
    /// Upgrade packet type
    Upgrade = 5,
    /// Noop packet type
    Noop = 6,
}

impl Packet {
    /// Check if the packet is a binary packet
    pub fn is_binary(&self) -> bool {
        matches!(self, Packet::Binary(_))
    }

    /// Get the wire type tag of the packet.
    ///
    /// A binary packet reports [`PacketType::Message`]: on the wire it is a
    /// message with an alternative framing, not a distinct packet type.
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Open(_) => PacketType::Open,
            Packet::Close => PacketType::Close,
            Packet::Ping(_) | Packet::PingUpgrade => PacketType::Ping,
            Packet::Pong(_) | Packet::PongUpgrade => PacketType::Pong,
            Packet::Message(_) | Packet::Binary(_) => PacketType::Message,
            Packet::Upgrade => PacketType::Upgrade,
            Packet::Noop => PacketType::Noop,
        }
    }

    /// Get the max size the packet could have when serialized
    ///
    /// If b64 is true, it returns the max size when serialized to base64
    ///
    /// The base64 max size factor is `ceil(n / 3) * 4`
    pub fn get_size_hint(&self, b64: bool) -> usize {
        match self {
            Packet::Open(data) => 1 + data.len(),
            Packet::Close => 1,
            Packet::Ping(data) => 1 + data.len(),
            Packet::Pong(data) => 1 + data.len(),
            Packet::PingUpgrade => 6,
            Packet::PongUpgrade => 6,
            Packet::Message(msg) => 1 + msg.len(),
            Packet::Upgrade => 1,
            Packet::Noop => 1,
            Packet::Binary(data) => {
                if b64 {
                    2 + base64::encoded_len(data.len(), true).unwrap_or(usize::MAX - 2)
                } else {
                    1 + data.len()
                }
            }
        }
    }

    /// Serialize the packet to the frame suited to the given transport.
    ///
    /// Only binary packets are framed differently: on a websocket they become
    /// a binary frame with a leading `0x04` message type byte, on a polling
    /// connection they fall back to the `b4` base64 text framing.
    pub fn encode(self, transport: TransportType) -> RawFrame {
        match (self, transport) {
            (Packet::Binary(data), TransportType::Websocket) => {
                let mut buf = Vec::with_capacity(data.len() + 1);
                buf.push(0x04);
                buf.extend_from_slice(&data);
                RawFrame::Binary(Bytes::from(buf))
            }
            (packet, _) => RawFrame::Text(Str::from(String::from(packet))),
        }
    }

    /// Deserialize a websocket binary frame, `0x04` followed by the payload
    pub fn try_from_binary(data: Bytes) -> Result<Self, Error> {
        match data.first() {
            Some(0x04) => Ok(Packet::Binary(data.slice(1..))),
            Some(t) => Err(Error::InvalidPacketType(Some(*t as char))),
            None => Err(Error::InvalidPacketType(None)),
        }
    }
}

/// Serialize a [Packet] to a [String] according to the Engine.IO protocol
impl From<Packet> for String {
    fn from(packet: Packet) -> String {
        let len = packet.get_size_hint(true);
        let mut buffer = String::with_capacity(len);
        match packet {
            Packet::Open(data) => {
                buffer.push('0');
                buffer.push_str(&data);
            }
            Packet::Close => buffer.push('1'),
            Packet::Ping(data) => {
                buffer.push('2');
                buffer.push_str(&data);
            }
            Packet::Pong(data) => {
                buffer.push('3');
                buffer.push_str(&data);
            }
            Packet::PingUpgrade => buffer.push_str("2probe"),
            Packet::PongUpgrade => buffer.push_str("3probe"),
            Packet::Message(msg) => {
                buffer.push('4');
                buffer.push_str(&msg);
            }
            Packet::Upgrade => buffer.push('5'),
            Packet::Noop => buffer.push('6'),
            Packet::Binary(data) => {
                buffer.push_str("b4");
                general_purpose::STANDARD.encode_string(data, &mut buffer);
            }
        };
        buffer
    }
}

/// Deserialize a [Packet] from a [`Str`] according to the Engine.IO protocol
impl TryFrom<Str> for Packet {
    type Error = Error;
    fn try_from(value: Str) -> Result<Self, Self::Error> {
        let packet_type = value
            .as_bytes()
            .first()
            .ok_or(Error::InvalidPacketType(None))?;
        // byte comparison, a malformed frame may not have a char boundary at 1
        let is_upgrade = value.len() == 6 && &value.as_bytes()[1..6] == b"probe";
        let res = match packet_type {
            b'0' => Packet::Open(value.slice(1..)),
            b'1' => Packet::Close,
            b'2' if is_upgrade => Packet::PingUpgrade,
            b'2' => Packet::Ping(value.slice(1..)),
            b'3' if is_upgrade => Packet::PongUpgrade,
            b'3' => Packet::Pong(value.slice(1..)),
            b'4' => Packet::Message(value.slice(1..)),
            b'5' => Packet::Upgrade,
            b'6' => Packet::Noop,
            b'b' if value.get(1) == Some(&b'4') => Packet::Binary(
                general_purpose::STANDARD
                    .decode(value.slice(2..).as_bytes())?
                    .into(),
            ),
            b'b' => Err(Error::InvalidPacketType(value.get(1).map(|c| *c as char)))?,
            c => Err(Error::InvalidPacketType(Some(*c as char)))?,
        };
        Ok(res)
    }
}

impl TryFrom<String> for Packet {
    type Error = Error;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Packet::try_from(Str::from(value))
    }
}

/// The handshake data carried by the open packet
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeData {
    /// The session ID assigned by the server.
    pub sid: Sid,
    /// The list of available transport upgrades.
    pub upgrades: Vec<String>,
    /// The ping interval, used in the heartbeat mechanism (in milliseconds).
    pub ping_interval: u64,
    /// The ping timeout, used in the heartbeat mechanism (in milliseconds).
    pub ping_timeout: u64,
}

impl HandshakeData {
    /// Parse the payload of an open packet
    pub fn parse(data: &Str) -> Result<Self, Error> {
        Ok(serde_json::from_str(data.as_str())?)
    }

    /// Whether the server advertises the websocket upgrade
    pub fn supports_websocket(&self) -> bool {
        self.upgrades.iter().any(|u| u == "websocket")
    }
}

/// Buffered packets to send to the server.
/// It is used to ensure atomicity when sending multiple packets, a message
/// and its binary attachments are never interleaved with other writes.
pub type PacketBuf = SmallVec<[Packet; 2]>;
