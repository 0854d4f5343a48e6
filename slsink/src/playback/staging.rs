//! Round-robin staging area for hardware units
//!
//! The hardware keeps reading an enqueued buffer until it reports completion,
//! so each unit is assembled in its own slot of one owned region sized
//! `pool_capacity × unit_size`. With at most `pool_capacity` units queued, a
//! slot is never overwritten while the hardware may still read it.

/// Owned fixed-size staging region with a modulo slot cursor
pub struct StagingArea {
    storage: Vec<u8>,
    unit_size: usize,
    slots: usize,
    next: usize,
}

impl StagingArea {
    pub fn new(slots: usize, unit_size: usize) -> Self {
        Self {
            storage: vec![0u8; slots * unit_size],
            unit_size,
            slots,
            next: 0,
        }
    }

    /// Index of the slot the next unit goes into
    pub fn next_index(&self) -> usize {
        self.next
    }

    /// Mutable view of the next slot
    pub fn next_slot_mut(&mut self) -> &mut [u8] {
        let start = self.next * self.unit_size;
        &mut self.storage[start..start + self.unit_size]
    }

    /// Read-only view of the next slot
    pub fn next_slot(&self) -> &[u8] {
        let start = self.next * self.unit_size;
        &self.storage[start..start + self.unit_size]
    }

    /// Move to the following slot, wrapping after the last
    pub fn advance(&mut self) {
        self.next = (self.next + 1) % self.slots;
    }

    /// Return the cursor to slot 0
    pub fn rewind(&mut self) {
        self.next = 0;
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }
}
