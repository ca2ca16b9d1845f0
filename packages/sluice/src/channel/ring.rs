// circular byte storage of a single channel.

use crate::error::{Error, Result};


// a single identity's circular buffer.
//
// - write == read means empty.
// - (write + 1) % capacity == read means full.
// - thus one slot is always unused, and at most capacity - 1 bytes are buffered.
// - both cursors are always in [0, capacity).
pub(crate) struct Ring {
    storage: Box<[u8]>,
    // index of the next byte to write.
    write: usize,
    // index of the next byte to read.
    read: usize,
    // set by a writer's close, cleared by the read that observes it with the ring empty.
    eof: bool,
}

impl Ring {
    // allocate an empty ring, or fail without panicking if the allocation can't be made.
    //
    // panics if capacity < 2. capacity is validated when the exchange starts.
    pub(crate) fn try_new(capacity: usize) -> Result<Self> {
        assert!(capacity >= 2, "ring capacity {} < 2 (internal bug)", capacity);
        let mut storage = Vec::new();
        storage
            .try_reserve_exact(capacity)
            .map_err(|_| Error::AllocationFailure { bytes: capacity })?;
        storage.resize(capacity, 0);
        Ok(Ring {
            storage: storage.into_boxed_slice(),
            write: 0,
            read: 0,
            eof: false,
        })
    }

    pub(crate) fn capacity(&self) -> usize {
        self.storage.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.write == self.read
    }

    pub(crate) fn is_full(&self) -> bool {
        (self.write + 1) % self.capacity() == self.read
    }

    // bytes available to read.
    pub(crate) fn buffered(&self) -> usize {
        (self.capacity() + self.write - self.read) % self.capacity()
    }

    // slots available to write.
    pub(crate) fn free(&self) -> usize {
        (self.capacity() + self.read - self.write - 1) % self.capacity()
    }

    pub(crate) fn eof(&self) -> bool {
        self.eof
    }

    pub(crate) fn set_eof(&mut self) {
        self.eof = true;
    }

    // if the eof flag is set and nothing is buffered, clear the flag and return true.
    pub(crate) fn take_eof(&mut self) -> bool {
        if self.eof && self.is_empty() {
            self.eof = false;
            true
        } else {
            false
        }
    }

    // copy as much of src as fits, advancing the write cursor. returns bytes copied.
    pub(crate) fn push(&mut self, src: &[u8]) -> usize {
        let cap = self.capacity();
        let n = src.len().min(self.free());
        // copy up to the physical end, then wrap around to the start
        let first = n.min(cap - self.write);
        self.storage[self.write..self.write + first].copy_from_slice(&src[..first]);
        self.storage[..n - first].copy_from_slice(&src[first..n]);
        self.write = (self.write + n) % cap;
        n
    }

    // append up to max buffered bytes to dst, advancing the read cursor. returns bytes copied.
    //
    // the caller is expected to have reserved room in dst.
    pub(crate) fn pop(&mut self, dst: &mut Vec<u8>, max: usize) -> usize {
        let cap = self.capacity();
        let n = max.min(self.buffered());
        let first = n.min(cap - self.read);
        dst.extend_from_slice(&self.storage[self.read..self.read + first]);
        dst.extend_from_slice(&self.storage[..n - first]);
        self.read = (self.read + n) % cap;
        n
    }

    #[cfg(test)]
    pub(crate) fn cursors(&self) -> (usize, usize) {
        (self.write, self.read)
    }
}
