//! Bounded handoff ring between the display callback and the consumer.
//!
//! The ring hands out indices into the picture pool; it never owns or copies
//! picture data. Occupancy is counted explicitly, so a full ring and an empty
//! ring are never confused even though both cursors may sit on the same slot.

use nvb_common::DecodeError;

/// Fixed-capacity slot allocator with FIFO read order.
#[derive(Clone, Debug)]
pub struct HandoffRing {
    capacity: usize,
    occupied: usize,
    /// Most recently written slot; `None` before the first write.
    write_cursor: Option<usize>,
    /// Most recently read slot; `None` before the first read.
    read_cursor: Option<usize>,
}

impl HandoffRing {
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be > 0");
        Self {
            capacity,
            occupied: 0,
            write_cursor: None,
            read_cursor: None,
        }
    }

    /// Claim the next slot for a freshly decoded picture.
    pub fn write(&mut self) -> Result<usize, DecodeError> {
        if self.occupied == self.capacity {
            return Err(DecodeError::Overflow);
        }
        let slot = self.advance(self.write_cursor);
        self.write_cursor = Some(slot);
        self.occupied += 1;
        Ok(slot)
    }

    /// Free the oldest outstanding slot.
    pub fn read(&mut self) -> Result<usize, DecodeError> {
        if self.occupied == 0 {
            return Err(DecodeError::Underflow);
        }
        let slot = self.advance(self.read_cursor);
        self.read_cursor = Some(slot);
        self.occupied -= 1;
        Ok(slot)
    }

    /// Slot written last, without consuming anything.
    pub fn peek_latest_written(&self) -> Option<usize> {
        self.write_cursor
    }

    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    pub fn is_full(&self) -> bool {
        self.occupied == self.capacity
    }

    /// Forget every outstanding slot.
    pub fn reset(&mut self) {
        self.occupied = 0;
        self.write_cursor = None;
        self.read_cursor = None;
    }

    pub fn len(&self) -> usize {
        self.occupied
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn advance(&self, cursor: Option<usize>) -> usize {
        cursor.map_or(0, |c| (c + 1) % self.capacity)
    }
}
