// exposed API of the exchange: the dispatch layer.

use super::{
    core::{ChannelStats, Core, Fill},
    wait::{Deadline, Interrupt, Interrupter},
};
use crate::{
    config::{Config, PrivilegedPolicy},
    error::{Error, Result},
    identity::{Identity, IdentitySource},
    transfer::{CopyIn, CopyOut},
};
use bytes::Bytes;
use std::{
    fmt::{self, Debug, Formatter},
    io,
    sync::Arc,
    time::Duration,
};


// state shared by an exchange and all its handles.
struct Shared<I> {
    core: Arc<Core<I>>,
    resolver: Box<dyn IdentitySource<I>>,
    privileged: Option<I>,
    privileged_policy: PrivilegedPolicy,
}

// which channel a handle's operations resolve to.
#[derive(Debug, Clone)]
enum Binding<I> {
    // the channel of whoever calls through the handle, resolved on every call.
    Caller,
    // the privileged channel, fixed when the handle was opened.
    Pinned(I),
}


/// Access a [`Handle`] is opened with
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Access {
    /// Reading only. Closing does not end the stream.
    Read,
    /// Writing only. Closing ends the stream.
    Write,
    /// Reading and writing. Closing ends the stream.
    ReadWrite,
}

impl Access {
    /// Whether reads are permitted
    pub fn can_read(self) -> bool {
        matches!(self, Access::Read | Access::ReadWrite)
    }

    /// Whether writes are permitted
    pub fn can_write(self) -> bool {
        matches!(self, Access::Write | Access::ReadWrite)
    }
}


/// A multi-tenant, in-memory byte-stream exchange
///
/// Every distinct caller identity gets its own fixed-capacity channel, created the first time
/// that identity opens a handle. Channels live until the exchange and all its handles are
/// dropped. Cloning an `Exchange` makes another reference to the same service.
///
/// If the configuration names a privileged identity, handles opened by that identity are pinned
/// to its channel, see [`Handle`].
pub struct Exchange<I>(Arc<Shared<I>>);

impl<I: Identity> Exchange<I> {
    /// Start an exchange
    ///
    /// `resolver` supplies the identity of whoever calls [`open`](Self::open), and of whoever
    /// calls through a non-privileged handle. Fails with [`Error::InvalidCapacity`] if the
    /// configured capacity is below 2.
    pub fn new<R>(config: Config<I>, resolver: R) -> Result<Self>
    where
        R: IdentitySource<I> + 'static,
    {
        config
            .validate()
            .inspect_err(|e| error!(%e, "refusing to start exchange"))?;
        info!(
            capacity = config.capacity,
            privileged = ?config.privileged,
            policy = ?config.privileged_policy,
            "starting exchange"
        );
        Ok(Exchange(Arc::new(Shared {
            core: Arc::new(Core::new(config.capacity)),
            resolver: Box::new(resolver),
            privileged: config.privileged,
            privileged_policy: config.privileged_policy,
        })))
    }

    /// Open a handle as the current caller
    ///
    /// Creates the caller's channel if it does not exist yet. If the caller is the privileged
    /// identity, the handle is pinned to the privileged channel.
    pub fn open(&self, access: Access) -> Result<Handle<I>> {
        let identity = self.0.resolver.current();
        self.0.core.ensure(&identity)?;
        let binding = if self.0.privileged.as_ref() == Some(&identity) {
            Binding::Pinned(identity.clone())
        } else {
            Binding::Caller
        };
        debug!(
            ?identity,
            ?access,
            privileged = matches!(binding, Binding::Pinned(_)),
            "opened handle"
        );
        Ok(Handle {
            shared: Arc::clone(&self.0),
            binding,
            access,
            interrupt: Interrupt::default(),
            closed: false,
        })
    }

    /// Storage size of each channel
    ///
    /// A channel holds at most one byte less than this at once.
    pub fn capacity(&self) -> usize {
        self.0.core.capacity()
    }

    /// Number of channels that exist
    ///
    /// Channels are never removed while the exchange runs, so this is the number of distinct
    /// identities that have ever used it.
    pub fn channel_count(&self) -> usize {
        self.0.core.channel_count()
    }

    /// Snapshot of the channel of `identity`, if it exists
    pub fn stats(&self, identity: &I) -> Option<ChannelStats> {
        self.0.core.stats(identity)
    }
}

impl<I> Clone for Exchange<I> {
    fn clone(&self) -> Self {
        Exchange(Arc::clone(&self.0))
    }
}

impl<I: Debug> Debug for Exchange<I> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("privileged", &self.0.privileged)
            .field("privileged_policy", &self.0.privileged_policy)
            .finish_non_exhaustive()
    }
}


/// Open handle to an [`Exchange`]
///
/// Reads and writes through an ordinary handle go to the channel of whoever makes the call, as
/// told by the exchange's identity source at that moment.
///
/// A handle opened by the privileged identity is instead pinned to the privileged channel. Under
/// [`PrivilegedPolicy::Delegate`] the handle itself is the capability: any caller that holds it,
/// for instance by having it shared or inherited, reads and writes the privileged channel without
/// proving its identity again. Under [`PrivilegedPolicy::Revalidate`] every call re-resolves the
/// caller and fails with [`Error::NotPrivileged`] for anyone else.
///
/// Dropping a handle closes it. Closing a handle opened with write access marks end-of-stream on
/// its channel.
pub struct Handle<I: Identity> {
    shared: Arc<Shared<I>>,
    binding: Binding<I>,
    access: Access,
    interrupt: Interrupt,
    closed: bool,
}

impl<I: Identity> Handle<I> {
    // identity of the channel a call made from the current context goes to.
    pub(crate) fn target(&self) -> Result<I> {
        match &self.binding {
            &Binding::Caller => Ok(self.shared.resolver.current()),
            &Binding::Pinned(ref privileged) => {
                if self.shared.privileged_policy == PrivilegedPolicy::Revalidate {
                    let caller = self.shared.resolver.current();
                    if &caller != privileged {
                        warn!(?caller, "rejecting non-privileged call through privileged handle");
                        return Err(Error::NotPrivileged);
                    }
                }
                Ok(privileged.clone())
            }
        }
    }

    fn check(&self, permitted: bool) -> Result<()> {
        if permitted {
            Ok(())
        } else {
            Err(Error::WrongAccess { access: self.access })
        }
    }

    fn read_with(&self, max_len: usize, fill: Fill, deadline: Deadline) -> Result<Bytes> {
        let identity = self.target()?;
        self.read_as(&identity, max_len, fill, deadline)
    }

    fn write_with<S: CopyIn>(&self, src: S, deadline: Deadline) -> Result<usize> {
        let identity = self.target()?;
        self.write_as(&identity, src, deadline)
    }

    // read from the channel of an identity resolved earlier by `target`, for operations that
    // run away from the calling context.
    pub(crate) fn read_as(
        &self,
        identity: &I,
        max_len: usize,
        fill: Fill,
        deadline: Deadline,
    ) -> Result<Bytes> {
        self.check(self.access.can_read())?;
        self.shared.core.read(identity, max_len, fill, &self.interrupt, deadline)
    }

    pub(crate) fn write_as<S: CopyIn>(
        &self,
        identity: &I,
        src: S,
        deadline: Deadline,
    ) -> Result<usize> {
        self.check(self.access.can_write())?;
        self.shared.core.write(identity, src, &self.interrupt, deadline)
    }

    /// Read up to `max_len` bytes, blocking until at least one is available
    ///
    /// Returns as soon as some bytes were read and the channel has run empty, so the result may
    /// be shorter than `max_len`. An empty result means end-of-stream: the writer closed with
    /// nothing left to read. The end-of-stream marker is one-shot, the read after it blocks for
    /// new data as if on a fresh stream.
    pub fn read(&self, max_len: usize) -> Result<Bytes> {
        self.read_with(max_len, Fill::Available, Deadline::Never)
    }

    /// Read exactly `len` bytes, unless the stream ends first
    ///
    /// Keeps blocking until `len` bytes were gathered. If the writer closes part-way through,
    /// returns the shorter result, and the end-of-stream marker is left for the next read.
    pub fn read_full(&self, len: usize) -> Result<Bytes> {
        self.read_with(len, Fill::Exact, Deadline::Never)
    }

    /// Read whatever is available without blocking
    ///
    /// Fails with [`Error::WouldBlock`] if the channel is empty and not at end-of-stream.
    pub fn try_read(&self, max_len: usize) -> Result<Bytes> {
        self.read_with(max_len, Fill::Available, Deadline::NonBlocking)
    }

    /// Like [`read`](Self::read), but gives up after `timeout`
    ///
    /// Fails with [`Error::WouldBlock`] if no byte arrived in time.
    pub fn read_timeout(&self, max_len: usize, timeout: Duration) -> Result<Bytes> {
        self.read_with(max_len, Fill::Available, Deadline::after(timeout))
    }

    /// Read with full control over gathering and blocking
    ///
    /// With `full`, behaves like [`read_full`](Self::read_full) until the deadline, returning
    /// what was gathered by then.
    pub fn read_deadline(&self, max_len: usize, full: bool, deadline: Deadline) -> Result<Bytes> {
        let fill = if full { Fill::Exact } else { Fill::Available };
        self.read_with(max_len, fill, deadline)
    }

    /// [`read`](Self::read) into a caller-side destination, returning the length read
    pub fn read_to<D: CopyOut>(&self, max_len: usize, mut dst: D) -> Result<usize> {
        let bytes = self.read(max_len)?;
        dst.copy_out(&bytes)?;
        Ok(bytes.len())
    }

    /// Write all of `data`, blocking while the channel is full
    ///
    /// Data larger than the channel streams through it, waking the reader after every chunk.
    /// Returns `data.len()`. If interrupted, fails with [`Error::Interrupted`], and the bytes
    /// written so far stay in the channel.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        self.write_with(data, Deadline::Never)
    }

    /// Write as much of `data` as fits without blocking
    ///
    /// Fails with [`Error::WouldBlock`] if the channel is full.
    pub fn try_write(&self, data: &[u8]) -> Result<usize> {
        self.write_with(data, Deadline::NonBlocking)
    }

    /// Like [`write`](Self::write), but gives up after `timeout`
    ///
    /// Returns the number of bytes written by then, or fails with [`Error::WouldBlock`] if none
    /// were.
    pub fn write_timeout(&self, data: &[u8], timeout: Duration) -> Result<usize> {
        self.write_with(data, Deadline::after(timeout))
    }

    /// Write from a caller-side source
    ///
    /// The source is copied into staging memory before the channel is touched, so a failing
    /// source leaves the channel as it was.
    pub fn write_from<S: CopyIn>(&self, src: S, deadline: Deadline) -> Result<usize> {
        self.write_with(src, deadline)
    }

    /// Get an [`Interrupter`] for cancelling this handle's blocked operations
    pub fn interrupter(&self) -> Interrupter {
        Interrupter::new(self.interrupt.clone(), self.shared.core.clone())
    }

    /// Access this handle was opened with
    pub fn access(&self) -> Access {
        self.access
    }

    /// Whether this handle is pinned to the privileged channel
    pub fn is_privileged(&self) -> bool {
        matches!(self.binding, Binding::Pinned(_))
    }

    /// Close the handle
    ///
    /// Equivalent to dropping it, except that errors are returned. For a handle with write
    /// access, marks end-of-stream on the channel and wakes its readers. Never frees the channel.
    pub fn close(mut self) -> Result<()> {
        self.close_inner()
    }

    fn close_inner(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if self.access.can_write() {
            let identity = self.target()?;
            self.shared.core.close_write(&identity)?;
        }
        Ok(())
    }

    // close against the channel of an identity resolved earlier by `target`.
    pub(crate) fn close_as(mut self, identity: &I) -> Result<()> {
        self.closed = true;
        if self.access.can_write() {
            self.shared.core.close_write(identity)?;
        }
        Ok(())
    }
}

impl<I: Identity> Debug for Handle<I> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Handle")
            .field("access", &self.access)
            .field("privileged", &matches!(self.binding, Binding::Pinned(_)))
            .finish_non_exhaustive()
    }
}

impl<I: Identity> Drop for Handle<I> {
    fn drop(&mut self) {
        if let Err(e) = self.close_inner() {
            warn!(%e, "error closing dropped handle");
        }
    }
}

impl<'a, I: Identity> io::Read for &'a Handle<I> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let max_len = buf.len();
        Ok(Handle::read_to(*self, max_len, buf)?)
    }
}

impl<I: Identity> io::Read for Handle<I> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut &*self, buf)
    }
}

impl<'a, I: Identity> io::Write for &'a Handle<I> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(Handle::write(*self, buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<I: Identity> io::Write for Handle<I> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut &*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}


// ==== tests ====
