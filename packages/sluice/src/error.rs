// exchange error types.

use crate::transfer::TransferError;
use std::io;
use thiserror::Error;


/// Result alias for exchange operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error for an exchange operation
///
/// Errors are never sticky: each is returned to the caller of the failing operation, and leaves
/// the channel it concerned in a consistent state. End-of-stream is not an error, it is an empty
/// successful read.
#[derive(Error, Debug)]
pub enum Error {
    /// Channel storage or a staging buffer could not be allocated
    ///
    /// Fails only the operation that tried to allocate. The registry is left as it was.
    #[error("failed to allocate {bytes} bytes")]
    AllocationFailure {
        /// Size of the allocation that failed
        bytes: usize,
    },
    /// A blocked wait was interrupted via an [`Interrupter`](crate::Interrupter)
    ///
    /// The operation may be retried. Bytes transferred before the interruption stay committed to
    /// the channel, so a write interrupted part-way through is partially visible to readers.
    #[error("interrupted after transferring {transferred} bytes")]
    Interrupted {
        /// Bytes committed to the channel before the interruption
        transferred: usize,
    },
    /// Configured channel capacity is too small to hold any byte
    #[error("invalid channel capacity {capacity} (must be at least 2)")]
    InvalidCapacity {
        /// The rejected capacity
        capacity: usize,
    },
    /// A non-blocking or deadline-bounded operation could not make any progress
    #[error("operation would block")]
    WouldBlock,
    /// The caller boundary failed to move bytes to or from staging memory
    #[error(transparent)]
    Transfer(#[from] TransferError),
    /// The handle was not opened with the access the operation needs
    #[error("handle opened for {access:?} access")]
    WrongAccess {
        /// Access the handle was opened with
        access: crate::Access,
    },
    /// A privileged handle was used by a caller other than the privileged identity
    ///
    /// Only returned under [`PrivilegedPolicy::Revalidate`](crate::PrivilegedPolicy::Revalidate).
    #[error("caller is not the privileged identity")]
    NotPrivileged,
}

impl Error {
    /// Whether the operation may succeed if simply reissued
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Interrupted { .. } | Error::WouldBlock)
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        let kind = match &e {
            &Error::AllocationFailure { .. } => io::ErrorKind::OutOfMemory,
            &Error::Interrupted { .. } => io::ErrorKind::Interrupted,
            &Error::InvalidCapacity { .. } => io::ErrorKind::InvalidInput,
            &Error::WouldBlock => io::ErrorKind::WouldBlock,
            &Error::Transfer(_) => io::ErrorKind::InvalidInput,
            &Error::WrongAccess { .. } => io::ErrorKind::PermissionDenied,
            &Error::NotPrivileged => io::ErrorKind::PermissionDenied,
        };
        io::Error::new(kind, e)
    }
}
