//! Byte Ring Buffer for Not-Yet-Emitted PCM
//!
//! Fixed-capacity circular buffer between the producer's irregular writes and
//! the fixed-size hardware units. It is the elastic shock absorber of the sink:
//! when the hardware queue is full, bytes accumulate here until a slot frees up.
//!
//! ```text
//! write_samples(bytes) → put()
//!                          ↓
//!                  ByteRingBuffer (~100ms of audio)
//!                          ↓
//!                get(unit_size) → staging slot → hardware queue
//! ```
//!
//! Not internally synchronized: the sink engine only touches it while holding
//! its lock, so the single-owner `HeapRb` is used directly rather than split
//! into producer/consumer halves.

use ringbuf::{traits::*, HeapRb};
use tracing::debug;

/// Byte-oriented circular buffer with bounded put/get
pub struct ByteRingBuffer {
    buffer: HeapRb<u8>,

    /// Total bytes accepted since creation or last clear
    total_put: u64,

    /// Total bytes read since creation or last clear
    total_got: u64,
}

impl ByteRingBuffer {
    /// Create a ring buffer holding `capacity` bytes
    ///
    /// # Panics
    /// If `capacity` is zero. Callers size it from a validated configuration.
    pub fn new(capacity: usize) -> Self {
        debug!("Creating byte ring buffer with capacity: {} bytes", capacity);
        Self {
            buffer: HeapRb::new(capacity),
            total_put: 0,
            total_got: 0,
        }
    }

    /// Bytes free
    pub fn space(&self) -> usize {
        self.buffer.vacant_len()
    }

    /// Bytes occupied
    pub fn level(&self) -> usize {
        self.buffer.occupied_len()
    }

    /// Fixed capacity in bytes
    pub fn capacity(&self) -> usize {
        self.buffer.capacity().into()
    }

    /// Copy up to `data.len()` bytes in; returns bytes actually written
    ///
    /// Never writes more than `space()` allows and never overwrites unread bytes.
    pub fn put(&mut self, data: &[u8]) -> usize {
        let written = self.buffer.push_slice(data);
        self.total_put += written as u64;
        written
    }

    /// Copy up to `dest.len()` bytes out; returns bytes actually read
    pub fn get(&mut self, dest: &mut [u8]) -> usize {
        let read = self.buffer.pop_slice(dest);
        self.total_got += read as u64;
        read
    }

    /// Discard all buffered bytes and reset the counters
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.total_put = 0;
        self.total_got = 0;
    }

    /// Get statistics
    pub fn stats(&self) -> RingBufferStats {
        RingBufferStats {
            capacity: self.capacity(),
            level: self.level(),
            total_put: self.total_put,
            total_got: self.total_got,
        }
    }
}

/// Ring buffer statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct RingBufferStats {
    /// Buffer capacity in bytes
    pub capacity: usize,

    /// Current occupied bytes
    pub level: usize,

    /// Bytes accepted since last clear
    pub total_put: u64,

    /// Bytes read since last clear
    pub total_got: u64,
}

impl RingBufferStats {
    /// Fraction of capacity in use (0.0 to 1.0)
    pub fn fill_ratio(&self) -> f32 {
        self.level as f32 / self.capacity as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_preserves_order() {
        let mut rb = ByteRingBuffer::new(16);

        assert_eq!(rb.put(&[1, 2, 3, 4, 5]), 5);
        assert_eq!(rb.level(), 5);
        assert_eq!(rb.space(), 11);

        let mut out = [0u8; 3];
        assert_eq!(rb.get(&mut out), 3);
        assert_eq!(out, [1, 2, 3]);
        assert_eq!(rb.level(), 2);
    }

    #[test]
    fn test_put_truncates_to_space() {
        let mut rb = ByteRingBuffer::new(8);

        assert_eq!(rb.put(&[7u8; 6]), 6);
        assert_eq!(rb.put(&[9u8; 6]), 2);
        assert_eq!(rb.level(), rb.capacity());
        assert_eq!(rb.space(), 0);
        assert_eq!(rb.put(&[1u8]), 0);
    }

    #[test]
    fn test_get_from_short_buffer_reads_what_exists() {
        let mut rb = ByteRingBuffer::new(8);
        rb.put(&[4, 5]);

        let mut out = [0u8; 6];
        assert_eq!(rb.get(&mut out), 2);
        assert_eq!(&out[..2], &[4, 5]);
        assert_eq!(rb.get(&mut out), 0);
    }

    #[test]
    fn test_wraparound_keeps_bytes_contiguous_for_reader() {
        let mut rb = ByteRingBuffer::new(8);
        let mut scratch = [0u8; 6];

        rb.put(&[0u8; 6]);
        rb.get(&mut scratch);
        // Write position now wraps past the end of storage
        assert_eq!(rb.put(&[1, 2, 3, 4, 5, 6]), 6);

        let mut out = [0u8; 6];
        assert_eq!(rb.get(&mut out), 6);
        assert_eq!(out, [1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_clear_resets_level_and_stats() {
        let mut rb = ByteRingBuffer::new(8);
        rb.put(&[1, 2, 3]);
        rb.clear();

        let stats = rb.stats();
        assert_eq!(stats.level, 0);
        assert_eq!(stats.total_put, 0);
        assert_eq!(rb.space(), 8);
    }

    #[test]
    fn test_stats_fill_ratio() {
        let mut rb = ByteRingBuffer::new(100);
        rb.put(&[0u8; 25]);
        let stats = rb.stats();
        assert_eq!(stats.total_put, 25);
        assert!((stats.fill_ratio() - 0.25).abs() < f32::EPSILON);

        rb.put(&[0u8; 75]);
        assert!((rb.stats().fill_ratio() - 1.0).abs() < f32::EPSILON);
    }
}
