//! Async adapters for calling an exchange from tokio.
//!
//! The exchange's operations block a thread, so these run them on tokio's blocking thread pool.
//! They must be awaited from within a tokio runtime.
//!
//! The identity an operation resolves to is looked up by the awaiting task before the operation
//! is handed to the pool, so identity sources tied to the calling thread or task see the caller.

use super::{
    api::Handle,
    core::Fill,
    wait::{Deadline, Interrupter},
};
use crate::{
    error::{Error, Result},
    identity::Identity,
};
use bytes::Bytes;
use std::{
    panic::resume_unwind,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
};


const RUNNING: u8 = 0;
const FINISHED: u8 = 1;
const CANCELLED: u8 = 2;

// cancellation state of one blocking operation, shared by its future and the pool thread.
//
// whichever side loses the race to leave RUNNING lowers the interrupt the future raised, so an
// operation that finished before its future was dropped leaves no interrupt pending on the handle.
#[derive(Clone)]
struct Cancel {
    state: Arc<AtomicU8>,
    interrupter: Interrupter,
}

impl Cancel {
    fn new(interrupter: Interrupter) -> Self {
        Cancel {
            state: Arc::new(AtomicU8::new(RUNNING)),
            interrupter,
        }
    }

    // called by the future when dropped before the operation resolved.
    fn cancel(&self) {
        self.interrupter.interrupt();
        if self.transition(CANCELLED).is_err() {
            self.interrupter.withdraw();
        }
    }

    // called on the pool thread once the operation returned.
    fn finish(&self) {
        if self.transition(FINISHED).is_err() {
            self.interrupter.withdraw();
        }
    }

    fn transition(&self, to: u8) -> Result<u8, u8> {
        self.state.compare_exchange(RUNNING, to, Ordering::AcqRel, Ordering::Acquire)
    }
}

// cancels an operation if dropped before being disarmed.
struct InterruptOnDrop(Option<Cancel>);

impl InterruptOnDrop {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        if let Some(cancel) = self.0.take() {
            cancel.cancel();
        }
    }
}


/// Async wrapper around a [`Handle`]
///
/// Dropping a future returned by this type before it resolves interrupts the operation, which
/// then behaves as if interrupted through [`Handle::interrupter`]: a write keeps the bytes it
/// already wrote, a read returns whatever it had already gathered.
pub struct AsyncHandle<I: Identity>(Arc<Handle<I>>);

impl<I: Identity> AsyncHandle<I> {
    /// Wrap a handle
    pub fn new(handle: Handle<I>) -> Self {
        AsyncHandle(Arc::new(handle))
    }

    // resolve the target channel here, then run op on the blocking pool, cancelling it if this
    // future is dropped.
    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Handle<I>, &I) -> Result<T> + Send + 'static,
    {
        let identity = self.0.target()?;
        let handle = Arc::clone(&self.0);
        let cancel = Cancel::new(handle.interrupter());
        let guard = InterruptOnDrop(Some(cancel.clone()));
        let joined = tokio::task::spawn_blocking(move || {
            let result = op(&handle, &identity);
            cancel.finish();
            // the adapter may have been dropped meanwhile, leaving the close to this thread
            if let Some(handle) = Arc::into_inner(handle) {
                if let Err(e) = handle.close_as(&identity) {
                    warn!(%e, "error closing dropped handle");
                }
            }
            result
        }).await;
        guard.disarm();
        match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => resume_unwind(e.into_panic()),
            // the runtime is shutting down
            Err(_) => Err(Error::Interrupted { transferred: 0 }),
        }
    }

    /// Async version of [`Handle::read`]
    pub async fn read(&self, max_len: usize) -> Result<Bytes> {
        self.run(move |handle, identity| {
            handle.read_as(identity, max_len, Fill::Available, Deadline::Never)
        }).await
    }

    /// Async version of [`Handle::read_full`]
    pub async fn read_full(&self, len: usize) -> Result<Bytes> {
        self.run(move |handle, identity| {
            handle.read_as(identity, len, Fill::Exact, Deadline::Never)
        }).await
    }

    /// Async version of [`Handle::write`]
    ///
    /// If the future is dropped part-way through, the write is interrupted and the bytes
    /// already written stay in the channel.
    pub async fn write(&self, data: impl Into<Bytes>) -> Result<usize> {
        let data = data.into();
        self.run(move |handle, identity| {
            handle.write_as(identity, &data[..], Deadline::Never)
        }).await
    }

    /// Get an [`Interrupter`] for the wrapped handle
    pub fn interrupter(&self) -> Interrupter {
        self.0.interrupter()
    }

    /// Get the wrapped handle back, unless an operation is still running on it
    pub fn into_inner(self) -> Result<Handle<I>, Self> {
        Arc::try_unwrap(self.0).map_err(AsyncHandle)
    }
}

impl<I: Identity> From<Handle<I>> for AsyncHandle<I> {
    fn from(handle: Handle<I>) -> Self {
        AsyncHandle::new(handle)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Access, Config, Exchange};
    use futures::task::noop_waker_ref;
    use std::{
        cell::Cell,
        future::Future,
        task::Context,
        thread,
        time::{Duration, Instant},
    };

    thread_local! {
        static CALLER: Cell<u32> = Cell::new(0);
    }

    fn caller_exchange(capacity: usize) -> Exchange<u32> {
        Exchange::new(Config::new(capacity), || CALLER.with(Cell::get)).unwrap()
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread().build().unwrap()
    }

    // wait for the pool thread to let go of the handle.
    fn unwrap_when_idle<I: Identity>(mut adapter: AsyncHandle<I>) -> Handle<I> {
        loop {
            match adapter.into_inner() {
                Ok(handle) => return handle,
                Err(still_shared) => {
                    adapter = still_shared;
                    thread::sleep(Duration::from_millis(1));
                }
            }
        }
    }

    #[test]
    fn async_round_trip() {
        let exchange = Exchange::new(Config::new(4), || 1u32).unwrap();
        let writer = AsyncHandle::new(exchange.open(Access::Write).unwrap());
        let reader = AsyncHandle::new(exchange.open(Access::Read).unwrap());
        runtime().block_on(async move {
            let read = reader.read_full(10);
            let write = async {
                let n = writer.write("ten bytes!").await.unwrap();
                writer.into_inner().ok().unwrap().close().unwrap();
                n
            };
            let (read, written) = futures::join!(read, write);
            assert_eq!(written, 10);
            assert_eq!(&read.unwrap()[..], b"ten bytes!");
            assert!(reader.read(1).await.unwrap().is_empty());
        });
    }

    #[test]
    fn async_ops_use_callers_channel() {
        CALLER.with(|caller| caller.set(5));
        let exchange = caller_exchange(16);
        let handle = AsyncHandle::new(exchange.open(Access::ReadWrite).unwrap());
        let rt = runtime();

        assert_eq!(rt.block_on(handle.write(&b"abc"[..])).unwrap(), 3);
        assert_eq!(exchange.stats(&5).unwrap().buffered, 3);
        assert!(exchange.stats(&0).is_none());

        assert_eq!(&rt.block_on(handle.read(8)).unwrap()[..], b"abc");
        assert_eq!(exchange.channel_count(), 1);
    }

    #[test]
    fn dropped_adapter_closes_callers_channel() {
        CALLER.with(|caller| caller.set(5));
        let exchange = caller_exchange(4);
        let reader = AsyncHandle::new(exchange.open(Access::ReadWrite).unwrap());
        runtime().block_on(async {
            let mut read = Box::pin(reader.read(4));
            let mut cx = Context::from_waker(noop_waker_ref());
            assert!(read.as_mut().poll(&mut cx).is_pending());
            drop(read);
        });
        // the pool thread may still hold the handle, in which case it does the close
        drop(reader);

        let deadline = Instant::now() + Duration::from_secs(10);
        while !exchange.stats(&5).unwrap().eof {
            assert!(Instant::now() < deadline, "end-of-stream never marked");
            thread::sleep(Duration::from_millis(1));
        }
        assert!(exchange.stats(&0).is_none());
    }

    #[test]
    fn dropped_read_is_interrupted() {
        let exchange = Exchange::new(Config::new(4), || 1u32).unwrap();
        let handle = exchange.open(Access::ReadWrite).unwrap();
        let reader = AsyncHandle::new(handle);
        let rt = runtime();
        rt.block_on(async {
            // poll the read once so its blocking op starts, then drop it
            let mut read = Box::pin(reader.read(4));
            let mut cx = Context::from_waker(noop_waker_ref());
            assert!(read.as_mut().poll(&mut cx).is_pending());
            drop(read);
        });
        let handle = unwrap_when_idle(reader);
        handle.write(b"ok").unwrap();
        assert_eq!(&handle.read(4).unwrap()[..], b"ok");
    }

    #[test]
    fn finished_then_dropped_op_leaves_no_interrupt() {
        let exchange = Exchange::new(Config::new(4), || 1u32).unwrap();
        let writer = AsyncHandle::new(exchange.open(Access::ReadWrite).unwrap());
        runtime().block_on(async {
            // start a write that never blocks, let it land, then drop its future unresolved
            let mut write = Box::pin(writer.write(&b"hi"[..]));
            let mut cx = Context::from_waker(noop_waker_ref());
            let _ = write.as_mut().poll(&mut cx);
            let deadline = Instant::now() + Duration::from_secs(10);
            while exchange.stats(&1).unwrap().buffered < 2 {
                assert!(Instant::now() < deadline, "write never landed");
                thread::sleep(Duration::from_millis(1));
            }
            drop(write);
        });
        let handle = unwrap_when_idle(writer);
        assert_eq!(&handle.read(4).unwrap()[..], b"hi");
        assert!(matches!(
            handle.read_timeout(4, Duration::from_millis(20)),
            Err(Error::WouldBlock),
        ));
    }
}
