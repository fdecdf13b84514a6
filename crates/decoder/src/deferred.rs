//! Packet tags waiting for their pictures.
//!
//! The parser's callbacks carry no per-packet user data, only the packet
//! timestamp echoed back on display. Each submitted packet's tag is queued
//! under its parser-clock timestamp and taken back out when a picture with
//! that timestamp is displayed.

use std::collections::VecDeque;

use tracing::trace;

use nvb_common::{PacketTag, ParserTicks};

/// Bounded queue of `(timestamp, tag)` pairs in submission order.
#[derive(Clone, Debug)]
pub struct PendingTags {
    entries: VecDeque<(ParserTicks, PacketTag)>,
    capacity: usize,
    /// Tag of the most recent submission, used when no entry matches.
    latest: Option<PacketTag>,
}

impl PendingTags {
    pub fn new(capacity: u32) -> Self {
        let capacity = capacity.max(1) as usize;
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            latest: None,
        }
    }

    /// Queue a tag. The oldest entry is evicted when full; its packet never
    /// produced a picture (parameter sets, skipped frames).
    pub fn push(&mut self, timestamp: ParserTicks, tag: PacketTag) {
        if self.entries.len() == self.capacity {
            if let Some((evicted, _)) = self.entries.pop_front() {
                trace!(timestamp = evicted.0, "Evicted unmatched packet tag");
            }
        }
        self.entries.push_back((timestamp, tag));
        self.latest = Some(tag);
    }

    /// Tag for a picture displayed with `timestamp`.
    ///
    /// Falls back to the most recently submitted tag when the parser
    /// reports a timestamp no queued packet carried.
    pub fn take(&mut self, timestamp: ParserTicks) -> Option<PacketTag> {
        match self.entries.iter().position(|(ts, _)| *ts == timestamp) {
            Some(pos) => self.entries.remove(pos).map(|(_, tag)| tag),
            None => self.latest,
        }
    }

    /// Change the bound, dropping the oldest entries if needed.
    pub fn set_capacity(&mut self, capacity: u32) {
        self.capacity = capacity.max(1) as usize;
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
