//! Boundary for moving bytes between a caller's memory and the exchange.
//!
//! Writes stage the caller's bytes through [`CopyIn`] before any lock is taken, so the critical
//! section never waits on caller-side transfer. Reads hand their gathered bytes to [`CopyOut`]
//! after the lock is released.

use thiserror::Error;


/// Error for the caller boundary failing to move bytes
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum TransferError {
    /// The destination cannot hold all the bytes being handed out
    #[error("destination holds {available} bytes but {needed} were read")]
    ShortDestination {
        /// Bytes that needed to be copied out
        needed: usize,
        /// Room in the destination
        available: usize,
    },
    /// The source produced fewer bytes than it announced
    #[error("source announced {announced} bytes but produced {produced}")]
    ShortSource {
        /// Bytes the source claimed to have
        announced: usize,
        /// Bytes actually produced
        produced: usize,
    },
    /// Caller memory could not be accessed
    #[error("caller memory fault: {0}")]
    Fault(String),
}

/// Source of bytes on the caller's side of the boundary
pub trait CopyIn {
    /// Number of bytes this source will copy in
    fn len(&self) -> usize;

    /// Copy exactly `staging.len()` bytes into `staging`
    ///
    /// Called once per write, with `staging.len() == self.len()`.
    fn copy_in(&mut self, staging: &mut [u8]) -> Result<(), TransferError>;
}

/// Destination for bytes on the caller's side of the boundary
pub trait CopyOut {
    /// Copy all of `data` to the caller
    fn copy_out(&mut self, data: &[u8]) -> Result<(), TransferError>;
}

impl<'a> CopyIn for &'a [u8] {
    fn len(&self) -> usize {
        <[u8]>::len(self)
    }

    fn copy_in(&mut self, staging: &mut [u8]) -> Result<(), TransferError> {
        if staging.len() > <[u8]>::len(self) {
            return Err(TransferError::ShortSource {
                announced: staging.len(),
                produced: <[u8]>::len(self),
            });
        }
        staging.copy_from_slice(&self[..staging.len()]);
        Ok(())
    }
}

// appends, so the caller learns how much was read from the read result.
impl<'a> CopyOut for &'a mut Vec<u8> {
    fn copy_out(&mut self, data: &[u8]) -> Result<(), TransferError> {
        self.extend_from_slice(data);
        Ok(())
    }
}

// copies to the front of the slice. the caller learns how much was written from the read result.
impl<'a> CopyOut for &'a mut [u8] {
    fn copy_out(&mut self, data: &[u8]) -> Result<(), TransferError> {
        if data.len() > self.len() {
            return Err(TransferError::ShortDestination {
                needed: data.len(),
                available: self.len(),
            });
        }
        self[..data.len()].copy_from_slice(data);
        Ok(())
    }
}
