//! Ordering policy for outbound writes.
//!
//! While an upgrade probe is in flight nothing may be written to either
//! transport, so the queue buffers every logical write and releases them as
//! one FIFO batch once the probe resolved. The engine performs the physical
//! dispatch, the queue only decides whether a write goes out now or later.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::packet::PacketType;
use crate::str::Str;

/// A single logical write: one text frame and the binary attachments sent
/// contiguously right after it. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteEntry {
    /// The text payload of the frame
    pub msg: Str,
    /// The wire type of the frame
    pub kind: PacketType,
    /// Binary attachments to follow the frame
    pub data: Vec<Bytes>,
}

#[cfg(test)]
impl WriteEntry {
    /// A plain message write without attachments
    pub fn message(msg: impl Into<Str>) -> Self {
        Self {
            msg: msg.into(),
            kind: PacketType::Message,
            data: Vec::new(),
        }
    }
}

/// Outcome of [`WriteQueue::push`]
#[derive(Debug, Clone, PartialEq)]
pub enum Enqueued {
    /// No probe in flight, the entry is handed back for immediate dispatch
    Dispatch(WriteEntry),
    /// A probe is in flight, the entry was buffered until it resolves
    Held,
}

/// FIFO buffer for writes issued while an upgrade probe is in flight
#[derive(Debug, Default)]
pub struct WriteQueue {
    held: VecDeque<WriteEntry>,
    holding: bool,
}

impl WriteQueue {
    /// Submit an entry. It is either handed back for immediate dispatch or
    /// buffered behind the in flight probe.
    pub fn push(&mut self, entry: WriteEntry) -> Enqueued {
        if self.holding {
            self.held.push_back(entry);
            Enqueued::Held
        } else {
            Enqueued::Dispatch(entry)
        }
    }

    /// Start buffering writes for the duration of a probe
    pub fn hold(&mut self) {
        self.holding = true;
    }

    /// Stop buffering and hand back everything held, in submission order.
    ///
    /// Called exactly once per probe: on success the batch goes out over the
    /// upgraded transport, on failure it is redirected to the polling
    /// transport instead.
    pub fn release(&mut self) -> Vec<WriteEntry> {
        self.holding = false;
        self.held.drain(..).collect()
    }

    /// Whether a probe currently holds writes back
    #[cfg(test)]
    pub fn is_holding(&self) -> bool {
        self.holding
    }

    /// Drop everything without dispatching, delivery is best effort on
    /// disconnect
    pub fn clear(&mut self) {
        self.holding = false;
        self.held.clear();
    }
}
