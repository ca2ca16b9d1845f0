// synchronization core and the read/write algorithms that run under it.

use super::{
    registry::Registry,
    wait::{lock, wait, Broadcast, Deadline, Interrupt, Stop},
};
use crate::{
    error::{Error, Result},
    identity::Identity,
    transfer::CopyIn,
};
use bytes::Bytes;
use std::sync::{Condvar, Mutex, PoisonError};


// shared state of an exchange.
//
// a single mutex serializes all registry and cursor mutation, for every channel. the two
// conditions are broadcast across all channels, so every waiter re-checks its own channel after
// waking.
pub(crate) struct Core<I> {
    registry: Mutex<Registry<I>>,
    // readers wait on this for their channel to become non-empty or reach end-of-stream.
    data_available: Condvar,
    // writers wait on this for their channel to become non-full.
    space_available: Condvar,
    // storage size of each channel.
    capacity: usize,
}

// how much a read gathers before returning.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Fill {
    // return once at least one byte was gathered and the channel has run empty.
    Available,
    // keep gathering until the requested length or end-of-stream.
    Exact,
}

/// Snapshot of a channel's state
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ChannelStats {
    /// Bytes currently buffered
    pub buffered: usize,
    /// Most bytes the channel can buffer at once
    pub usable_capacity: usize,
    /// Whether an end-of-stream marker is pending
    pub eof: bool,
}

impl<I: Identity> Core<I> {
    // construct with no channels. capacity must already be validated.
    pub(crate) fn new(capacity: usize) -> Self {
        Core {
            registry: Mutex::new(Registry::new(capacity)),
            data_available: Condvar::new(),
            space_available: Condvar::new(),
            capacity,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn ensure(&self, identity: &I) -> Result<()> {
        lock(&self.registry).ensure(identity).map(drop)
    }

    pub(crate) fn stats(&self, identity: &I) -> Option<ChannelStats> {
        lock(&self.registry).get(identity).map(|ring| ChannelStats {
            buffered: ring.buffered(),
            usable_capacity: ring.capacity() - 1,
            eof: ring.eof(),
        })
    }

    pub(crate) fn channel_count(&self) -> usize {
        lock(&self.registry).len()
    }

    // mark end-of-stream on identity's channel and wake its readers.
    pub(crate) fn close_write(&self, identity: &I) -> Result<()> {
        let mut registry = lock(&self.registry);
        registry.ensure(identity)?.set_eof();
        debug!(?identity, "marking end-of-stream");
        self.data_available.notify_all();
        Ok(())
    }

    // write all of src into identity's channel, blocking while it is full.
    //
    // src is staged into local memory before the lock is taken. readers are woken after every
    // chunk, so they can make progress before the whole write completes.
    pub(crate) fn write<S: CopyIn>(
        &self,
        identity: &I,
        mut src: S,
        interrupt: &Interrupt,
        deadline: Deadline,
    ) -> Result<usize> {
        let n = src.len();
        let mut staging = Vec::new();
        staging
            .try_reserve_exact(n)
            .map_err(|_| Error::AllocationFailure { bytes: n })
            .inspect_err(|e| warn!(?identity, %e, "failed to allocate write staging"))?;
        staging.resize(n, 0);
        src.copy_in(&mut staging)?;

        let mut registry = lock(&self.registry);
        let mut written = 0;
        registry.ensure(identity)?;
        while written < n {
            let ring = registry.ensure(identity)?;
            if ring.is_full() {
                let (guard, result) = wait(registry, &self.space_available, interrupt, deadline);
                registry = guard;
                match result {
                    Ok(()) => continue,
                    Err(Stop::Interrupted) => {
                        trace!(?identity, written, "write interrupted");
                        return Err(Error::Interrupted { transferred: written });
                    }
                    Err(Stop::TimedOut) if written > 0 => return Ok(written),
                    Err(Stop::TimedOut) => return Err(Error::WouldBlock),
                }
            }
            let chunk = ring.push(&staging[written..]);
            written += chunk;
            trace!(?identity, chunk, written, "wrote chunk");
            self.data_available.notify_all();
        }
        Ok(written)
    }

    // read up to max_len bytes from identity's channel, blocking while it is empty.
    //
    // an empty result means end-of-stream. the marker is one-shot: the read that returns it
    // clears it, and the next read waits for new data as if on a fresh stream.
    pub(crate) fn read(
        &self,
        identity: &I,
        max_len: usize,
        fill: Fill,
        interrupt: &Interrupt,
        deadline: Deadline,
    ) -> Result<Bytes> {
        let mut out = Vec::new();
        let initial = max_len.min(self.capacity - 1);
        out.try_reserve_exact(initial)
            .map_err(|_| Error::AllocationFailure { bytes: initial })
            .inspect_err(|e| warn!(?identity, %e, "failed to allocate read buffer"))?;

        let mut registry = lock(&self.registry);
        if registry.ensure(identity)?.take_eof() {
            trace!(?identity, "consumed end-of-stream");
            return Ok(Bytes::new());
        }
        while out.len() < max_len {
            let ring = registry.ensure(identity)?;
            if ring.is_empty() {
                if ring.eof() {
                    // a short read signals the end of the stream. the flag is left for the next
                    // read, unless this read is itself the empty end-of-stream read.
                    if out.is_empty() {
                        ring.take_eof();
                        trace!(?identity, "consumed end-of-stream");
                    }
                    break;
                }
                if fill == Fill::Available && !out.is_empty() {
                    break;
                }
                let (guard, result) = wait(registry, &self.data_available, interrupt, deadline);
                registry = guard;
                match result {
                    Ok(()) => continue,
                    // bytes already taken out of the channel are handed back rather than lost
                    Err(_) if !out.is_empty() => break,
                    Err(Stop::Interrupted) => {
                        trace!(?identity, "read interrupted");
                        return Err(Error::Interrupted { transferred: 0 });
                    }
                    Err(Stop::TimedOut) => return Err(Error::WouldBlock),
                }
            }
            let want = (max_len - out.len()).min(ring.buffered());
            if out.try_reserve(want).is_err() {
                warn!(?identity, want, "failed to grow read buffer");
                if out.is_empty() {
                    return Err(Error::AllocationFailure { bytes: want });
                }
                break;
            }
            let chunk = ring.pop(&mut out, want);
            trace!(?identity, chunk, gathered = out.len(), "read chunk");
            self.space_available.notify_all();
        }
        Ok(Bytes::from(out))
    }
}

impl<I: Identity> Broadcast for Core<I> {
    fn broadcast_all(&self) {
        let _registry = lock(&self.registry);
        self.data_available.notify_all();
        self.space_available.notify_all();
    }
}

impl<I> Drop for Core<I> {
    fn drop(&mut self) {
        let registry = self.registry.get_mut().unwrap_or_else(PoisonError::into_inner);
        debug!(channels = registry.len(), "tearing down exchange");
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::Arc,
        thread,
        time::Duration,
    };

    fn never() -> (Interrupt, Deadline) {
        (Interrupt::default(), Deadline::Never)
    }

    #[test]
    fn write_then_read() {
        let core = Core::<u32>::new(8);
        let (interrupt, deadline) = never();
        assert_eq!(core.write(&1, &b"hello"[..], &interrupt, deadline).unwrap(), 5);
        let got = core.read(&1, 16, Fill::Available, &interrupt, deadline).unwrap();
        assert_eq!(&got[..], b"hello");
    }

    #[test]
    fn zero_length_ops() {
        let core = Core::<u32>::new(4);
        let (interrupt, deadline) = never();
        assert_eq!(core.write(&1, &b""[..], &interrupt, deadline).unwrap(), 0);
        assert_eq!(core.channel_count(), 1);
        assert!(core.read(&1, 0, Fill::Exact, &interrupt, deadline).unwrap().is_empty());
    }

    #[test]
    fn nonblocking_ops_on_empty_and_full() {
        let core = Core::<u32>::new(4);
        let interrupt = Interrupt::default();
        assert!(matches!(
            core.read(&1, 1, Fill::Available, &interrupt, Deadline::NonBlocking),
            Err(Error::WouldBlock),
        ));
        // three fit, the rest is reported as partial progress
        assert_eq!(core.write(&1, &b"abcde"[..], &interrupt, Deadline::NonBlocking).unwrap(), 3);
        assert!(matches!(
            core.write(&1, &b"f"[..], &interrupt, Deadline::NonBlocking),
            Err(Error::WouldBlock),
        ));
        assert_eq!(core.stats(&1).unwrap().buffered, 3);
    }

    #[test]
    fn short_read_at_eof_keeps_marker() {
        let core = Core::<u32>::new(8);
        let (interrupt, deadline) = never();
        core.write(&1, &b"abc"[..], &interrupt, deadline).unwrap();
        core.close_write(&1).unwrap();

        // gathering stops at end-of-stream with fewer bytes than asked for
        let got = core.read(&1, 10, Fill::Exact, &interrupt, deadline).unwrap();
        assert_eq!(&got[..], b"abc");
        assert!(core.stats(&1).unwrap().eof);

        // then the marker itself, exactly once
        assert!(core.read(&1, 10, Fill::Exact, &interrupt, deadline).unwrap().is_empty());
        assert!(!core.stats(&1).unwrap().eof);
        assert!(matches!(
            core.read(&1, 10, Fill::Exact, &interrupt, Deadline::NonBlocking),
            Err(Error::WouldBlock),
        ));
    }

    #[test]
    fn exact_read_spans_multiple_writes() {
        let core = Arc::new(Core::<u32>::new(4));
        let writer = {
            let core = Arc::clone(&core);
            thread::spawn(move || {
                let interrupt = Interrupt::default();
                for chunk in [&b"ab"[..], b"cd", b"ef", b"gh"] {
                    core.write(&7, chunk, &interrupt, Deadline::Never).unwrap();
                    thread::sleep(Duration::from_millis(5));
                }
            })
        };
        let interrupt = Interrupt::default();
        let deadline = Deadline::after(Duration::from_secs(10));
        let got = core.read(&7, 8, Fill::Exact, &interrupt, deadline).unwrap();
        assert_eq!(&got[..], b"abcdefgh");
        writer.join().unwrap();
    }

    #[test]
    fn large_write_streams_through_small_channel() {
        let core = Arc::new(Core::<u32>::new(3));
        let data: Vec<u8> = (0..=255).collect();
        let reader = {
            let core = Arc::clone(&core);
            thread::spawn(move || {
                let interrupt = Interrupt::default();
                let deadline = Deadline::after(Duration::from_secs(10));
                core.read(&1, 256, Fill::Exact, &interrupt, deadline).unwrap()
            })
        };
        let interrupt = Interrupt::default();
        assert_eq!(core.write(&1, &data[..], &interrupt, Deadline::Never).unwrap(), 256);
        assert_eq!(&reader.join().unwrap()[..], &data[..]);
    }

    #[test]
    fn interrupted_write_keeps_partial_bytes() {
        let core = Arc::new(Core::<u32>::new(4));
        let interrupt = Interrupt::default();
        let interrupter = super::super::wait::Interrupter::new(interrupt.clone(), core.clone());
        let writer = {
            let core = Arc::clone(&core);
            thread::spawn(move || core.write(&1, &b"abcdef"[..], &interrupt, Deadline::Never))
        };
        // wait until the writer has filled the channel and is blocked
        while core.stats(&1).map(|s| s.buffered) != Some(3) {
            thread::sleep(Duration::from_millis(1));
        }
        thread::sleep(Duration::from_millis(10));
        interrupter.interrupt();
        assert!(matches!(writer.join().unwrap(), Err(Error::Interrupted { transferred: 3 })));

        let interrupt = Interrupt::default();
        let got = core.read(&1, 10, Fill::Available, &interrupt, Deadline::NonBlocking).unwrap();
        assert_eq!(&got[..], b"abc");
    }

    #[test]
    fn timed_out_write_reports_progress() {
        let core = Core::<u32>::new(4);
        let interrupt = Interrupt::default();
        let deadline = Deadline::after(Duration::from_millis(20));
        assert_eq!(core.write(&1, &b"abcdef"[..], &interrupt, deadline).unwrap(), 3);
    }

    #[test]
    fn channels_are_isolated() {
        let core = Core::<&'static str>::new(8);
        let (interrupt, deadline) = never();
        core.write(&"a", &b"for a"[..], &interrupt, deadline).unwrap();
        core.write(&"b", &b"for b"[..], &interrupt, deadline).unwrap();
        core.close_write(&"a").unwrap();
        assert_eq!(&core.read(&"b", 8, Fill::Available, &interrupt, deadline).unwrap()[..], b"for b");
        assert_eq!(&core.read(&"a", 8, Fill::Available, &interrupt, deadline).unwrap()[..], b"for a");
        assert!(!core.stats(&"b").unwrap().eof);
        assert!(core.stats(&"a").unwrap().eof);
    }
}
