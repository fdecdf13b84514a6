//! Compressed packets going into a session and the tags echoed back out.

use serde::{Deserialize, Serialize};

use crate::types::WallClockMs;

/// Stream slot identifier assigned by the upstream packet source.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotId(pub u32);

/// Subsession identifier (e.g. track index within a slot).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubsessionId(pub u32);

/// Identifiers carried from a packet to the pictures it produces.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PacketTag {
    pub slot: SlotId,
    pub subsession: SubsessionId,
}

impl PacketTag {
    pub fn new(slot: u32, subsession: u32) -> Self {
        Self {
            slot: SlotId(slot),
            subsession: SubsessionId(subsession),
        }
    }
}

/// One compressed access unit (Annex-B for H.264/HEVC) with its wall-clock
/// timestamp.
#[derive(Clone, Copy, Debug)]
pub struct CompressedPacket<'a> {
    pub data: &'a [u8],
    pub timestamp: WallClockMs,
    pub tag: PacketTag,
}

impl<'a> CompressedPacket<'a> {
    pub fn new(data: &'a [u8], timestamp: WallClockMs) -> Self {
        Self {
            data,
            timestamp,
            tag: PacketTag::default(),
        }
    }

    pub fn with_tag(mut self, tag: PacketTag) -> Self {
        self.tag = tag;
        self
    }
}
