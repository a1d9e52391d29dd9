//! Fixed-capacity single-producer/single-consumer byte ring.
//!
//! Exposes contiguous slices rather than individual bytes so a caller can
//! `memcpy` (or, in safe Rust, `copy_from_slice`) samples straight through
//! without an intermediate copy. A slice may be shorter than the total
//! queued/writable count when the region wraps around the end of the
//! backing store — callers loop until they've moved as many bytes as they
//! need.

use std::collections::TryReserveError;

pub struct ByteRing {
    buf: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
    queued: usize,
}

impl ByteRing {
    /// Infallible convenience constructor for tests and call sites that
    /// don't need to distinguish allocation failure from any other error.
    pub fn new(capacity: usize) -> Self {
        Self::try_new(capacity).expect("ring allocation failed")
    }

    /// Fallible allocation path: lets a caller surface `OutOfMemory` to its
    /// own caller instead of aborting the process on a failed allocation.
    pub fn try_new(capacity: usize) -> Result<Self, TryReserveError> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(capacity)?;
        buf.resize(capacity, 0);

        Ok(ByteRing {
            buf,
            read_pos: 0,
            write_pos: 0,
            queued: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Total bytes available to read.
    pub fn queued(&self) -> usize {
        self.queued
    }

    /// Total bytes available to write.
    pub fn writable(&self) -> usize {
        self.capacity() - self.queued
    }

    /// The contiguous region available to write into right now, up to the
    /// wrap point. May be shorter than [`ByteRing::writable`].
    pub fn writable_slice(&mut self) -> &mut [u8] {
        let contiguous = self.capacity() - self.write_pos;
        let len = self.writable().min(contiguous);
        &mut self.buf[self.write_pos..self.write_pos + len]
    }

    /// Advance the write cursor by `n` bytes, marking them as queued for
    /// reading. `n` must not exceed the length of the slice last returned
    /// by [`ByteRing::writable_slice`] (or more generally, `writable()`).
    pub fn commit_write(&mut self, n: usize) {
        assert!(n <= self.writable(), "commit_write overflows ring capacity");
        self.write_pos = (self.write_pos + n) % self.capacity().max(1);
        self.queued += n;
    }

    /// The contiguous region available to read right now, up to the wrap
    /// point. May be shorter than [`ByteRing::queued`].
    pub fn readable_slice(&self) -> &[u8] {
        let contiguous = self.capacity() - self.read_pos;
        let len = self.queued.min(contiguous);
        &self.buf[self.read_pos..self.read_pos + len]
    }

    /// Advance the read cursor by `n` bytes, freeing them for writing.
    pub fn commit_read(&mut self, n: usize) {
        assert!(n <= self.queued, "commit_read overflows queued bytes");
        self.read_pos = (self.read_pos + n) % self.capacity().max(1);
        self.queued -= n;
    }

    /// Return the ring to empty, rewinding both cursors.
    pub fn reset(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
        self.queued = 0;
    }

    /// Commit up to `n` zero bytes into the writable region. Returns the
    /// number actually committed, which is short iff capacity was
    /// exhausted first.
    pub fn zero_fill(&mut self, n: usize) -> usize {
        let mut remaining = n.min(self.writable());
        let total = remaining;

        while remaining > 0 {
            let slice = self.writable_slice();
            if slice.is_empty() {
                break;
            }
            let take = slice.len().min(remaining);
            slice[..take].fill(0);
            self.commit_write(take);
            remaining -= take;
        }

        total - remaining
    }

    /// Zero the entire backing store without touching either cursor. Used
    /// by the HFP no-stream fallback, which must make subsequent reads
    /// return silence without disturbing the byte-offset bookkeeping that
    /// keeps the paired input/output devices aligned.
    pub fn zero_fill_all(&mut self) {
        self.buf.fill(0);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn empty_ring_invariant() {
        let ring = ByteRing::new(16);
        assert_eq!(ring.queued(), 0);
        assert_eq!(ring.writable(), 16);
    }

    #[test]
    fn write_then_read_roundtrip() {
        let mut ring = ByteRing::new(8);
        let slice = ring.writable_slice();
        slice[..4].copy_from_slice(b"abcd");
        ring.commit_write(4);

        assert_eq!(ring.queued(), 4);
        assert_eq!(ring.writable(), 4);
        assert_eq!(ring.readable_slice(), b"abcd");

        ring.commit_read(4);
        assert_eq!(ring.queued(), 0);
        assert_eq!(ring.writable(), 8);
    }

    #[test]
    fn wrap_around_splits_into_two_slices() {
        let mut ring = ByteRing::new(8);
        ring.commit_write(6);
        ring.commit_read(6);
        // write_pos is now at 6, so a write of 4 bytes must wrap.
        let first = ring.writable_slice().len();
        assert_eq!(first, 2); // contiguous to end of buffer
        ring.commit_write(2);
        let second = ring.writable_slice().len();
        assert_eq!(second, 6); // wrapped back to start
    }

    #[test]
    fn zero_fill_commits_zero_bytes() {
        let mut ring = ByteRing::new(8);
        ring.commit_write(8);
        ring.commit_read(8);
        let n = ring.zero_fill(4);
        assert_eq!(n, 4);
        assert_eq!(ring.readable_slice(), &[0, 0, 0, 0]);
    }

    #[test]
    fn zero_fill_all_does_not_move_cursors() {
        let mut ring = ByteRing::new(8);
        let slice = ring.writable_slice();
        slice[..4].copy_from_slice(b"abcd");
        ring.commit_write(4);
        ring.commit_read(2);

        let (read_pos, write_pos, queued) = (ring.read_pos, ring.write_pos, ring.queued);
        ring.zero_fill_all();
        assert_eq!((ring.read_pos, ring.write_pos, ring.queued), (read_pos, write_pos, queued));
        assert!(ring.buf.iter().all(|&b| b == 0));
    }

    #[quickcheck]
    fn queued_plus_writable_is_capacity(ops: Vec<(bool, u8)>) -> bool {
        let mut ring = ByteRing::new(64);
        for (is_write, amount) in ops {
            let amount = amount as usize;
            if is_write {
                let n = amount.min(ring.writable());
                ring.commit_write(n);
            } else {
                let n = amount.min(ring.queued());
                ring.commit_read(n);
            }
            if ring.queued() + ring.writable() != ring.capacity() {
                return false;
            }
        }
        true
    }
}
