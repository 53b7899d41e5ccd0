//! Fixed-capacity sample buffer.
//!
//! Acquisition appends whole samples at the write cursor, transmission
//! drains them from the read cursor. `read <= write <= capacity` always
//! holds; both cursors return to zero only through [`SampleBuffer::reset`].

use cl_common::consts::{MAX_PACKET_FLOATS, SAMPLE_BUFFER_CAPACITY};
use heapless::Vec as HVec;
use static_assertions::const_assert;

const_assert!(SAMPLE_BUFFER_CAPACITY >= MAX_PACKET_FLOATS);

#[derive(Debug, Clone)]
pub struct SampleBuffer {
    data: [f32; SAMPLE_BUFFER_CAPACITY],
    write: usize,
    read: usize,
}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleBuffer {
    pub const fn new() -> Self {
        Self {
            data: [0.0; SAMPLE_BUFFER_CAPACITY],
            write: 0,
            read: 0,
        }
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        SAMPLE_BUFFER_CAPACITY
    }

    #[inline]
    pub const fn write_cursor(&self) -> usize {
        self.write
    }

    #[inline]
    pub const fn read_cursor(&self) -> usize {
        self.read
    }

    /// Nothing written since the last reset.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.write == 0
    }

    /// Written but not yet drained values.
    #[inline]
    pub const fn unread(&self) -> usize {
        self.write - self.read
    }

    /// Append one sample. Returns `false` (and writes nothing) if it does not fit.
    pub fn push(&mut self, values: &[f32]) -> bool {
        let end = self.write + values.len();
        if end > SAMPLE_BUFFER_CAPACITY {
            return false;
        }
        self.data[self.write..end].copy_from_slice(values);
        self.write = end;
        true
    }

    /// Move up to `count` unread values into `out`, advancing the read cursor.
    ///
    /// Returns the number of values moved.
    pub fn drain_into(&mut self, count: usize, out: &mut HVec<f32, MAX_PACKET_FLOATS>) -> usize {
        let n = count.min(self.unread()).min(out.capacity() - out.len());
        let start = self.read;
        // Capacity checked above, extend cannot fail.
        let _ = out.extend_from_slice(&self.data[start..start + n]);
        self.read += n;
        n
    }

    /// Values written since the last reset.
    #[inline]
    pub fn written(&self) -> &[f32] {
        &self.data[..self.write]
    }

    /// Return both cursors to zero.
    #[inline]
    pub fn reset(&mut self) {
        self.write = 0;
        self.read = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_drain_fifo() {
        let mut b = SampleBuffer::new();
        assert!(b.is_empty());
        assert!(b.push(&[1.0, 2.0, 3.0]));
        assert!(b.push(&[4.0, 5.0, 6.0]));
        assert_eq!(b.unread(), 6);

        let mut out = HVec::new();
        assert_eq!(b.drain_into(4, &mut out), 4);
        assert_eq!(out.as_slice(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(b.read_cursor(), 4);
        assert_eq!(b.write_cursor(), 6);

        let mut out = HVec::new();
        assert_eq!(b.drain_into(10, &mut out), 2);
        assert_eq!(out.as_slice(), &[5.0, 6.0]);
        assert_eq!(b.unread(), 0);
        assert!(!b.is_empty());

        b.reset();
        assert!(b.is_empty());
        assert_eq!(b.read_cursor(), 0);
    }

    #[test]
    fn push_past_capacity_is_refused() {
        let mut b = SampleBuffer::new();
        let sample = [0.5f32; 12];
        for _ in 0..50 {
            assert!(b.push(&sample));
        }
        assert_eq!(b.write_cursor(), b.capacity());
        assert!(!b.push(&[1.0]));
        assert_eq!(b.write_cursor(), b.capacity());
    }
}
