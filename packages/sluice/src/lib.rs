//! In-memory, multi-tenant byte-stream exchange.
//!
//! Each caller identity gets its own fixed-capacity circular buffer, its channel, and reads and
//! writes variable-length byte runs against it with blocking semantics. Closing a writer marks a
//! one-shot end-of-stream. One optional privileged identity has its handles pinned to its own
//! channel at open time.
//!
//! ```no_run
//! use sluice::{Access, Config, Exchange};
//!
//! let exchange = Exchange::new(Config::new(4096), || std::process::id()).unwrap();
//! let writer = exchange.open(Access::Write).unwrap();
//! let reader = exchange.open(Access::Read).unwrap();
//! writer.write(b"hello").unwrap();
//! assert_eq!(&reader.read(64).unwrap()[..], b"hello");
//! ```

#[macro_use]
extern crate tracing;

pub extern crate bytes;

mod channel;
mod config;
mod identity;
pub mod transfer;

pub use crate::{
    channel::{
        api::*,
        core::ChannelStats,
        wait::{Deadline, Interrupter},
    },
    config::{Config, PrivilegedPolicy, DEFAULT_CAPACITY},
    error::{Error, Result},
    identity::{Identity, IdentitySource},
};

/// Error types
pub mod error;

/// Async adapters
pub mod future {
    pub use crate::channel::future::*;
}
