//! Exchange configuration.

use crate::error::{Error, Result};


/// Channel capacity used by [`Config::default`]
pub const DEFAULT_CAPACITY: usize = 4096;

/// Configuration fixed once when an [`Exchange`](crate::Exchange) starts
#[derive(Debug, Clone)]
pub struct Config<I> {
    /// Storage size of each channel, in bytes
    ///
    /// One slot is reserved to tell a full channel from an empty one, so a channel holds at most
    /// `capacity - 1` bytes at once.
    pub capacity: usize,
    /// The privileged identity, whose channel handles are pinned to it at open time
    pub privileged: Option<I>,
    /// How calls through a privileged handle are checked
    pub privileged_policy: PrivilegedPolicy,
}

/// How calls through a handle opened by the privileged identity are checked
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum PrivilegedPolicy {
    /// The handle is a capability: whoever holds it reaches the privileged channel
    ///
    /// The privileged identity is checked once, at open. A handle that is shared with or
    /// inherited by another caller still reads and writes the privileged channel.
    #[default]
    Delegate,
    /// Every call through the handle re-resolves the caller, and fails with
    /// [`Error::NotPrivileged`] unless it is the privileged identity
    Revalidate,
}

impl<I> Config<I> {
    /// Construct with the given capacity, no privileged identity, and the default policy
    pub fn new(capacity: usize) -> Self {
        Config {
            capacity,
            privileged: None,
            privileged_policy: PrivilegedPolicy::default(),
        }
    }

    /// Set the storage size of each channel
    pub fn set_capacity(&mut self, capacity: usize) -> &mut Self {
        self.capacity = capacity;
        self
    }

    /// Ownership-chaining version of [`set_capacity`](Self::set_capacity)
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the privileged identity
    pub fn set_privileged(&mut self, privileged: I) -> &mut Self {
        self.privileged = Some(privileged);
        self
    }

    /// Ownership-chaining version of [`set_privileged`](Self::set_privileged)
    pub fn with_privileged(mut self, privileged: I) -> Self {
        self.privileged = Some(privileged);
        self
    }

    /// Set how calls through privileged handles are checked
    pub fn set_privileged_policy(&mut self, policy: PrivilegedPolicy) -> &mut Self {
        self.privileged_policy = policy;
        self
    }

    /// Ownership-chaining version of [`set_privileged_policy`](Self::set_privileged_policy)
    pub fn with_privileged_policy(mut self, policy: PrivilegedPolicy) -> Self {
        self.privileged_policy = policy;
        self
    }

    /// Bytes a channel can hold at once
    pub fn usable_capacity(&self) -> usize {
        self.capacity.saturating_sub(1)
    }

    /// Check that the configuration can start a service
    pub fn validate(&self) -> Result<()> {
        if self.capacity < 2 {
            return Err(Error::InvalidCapacity { capacity: self.capacity });
        }
        Ok(())
    }
}

impl<I> Default for Config<I> {
    fn default() -> Self {
        Config::new(DEFAULT_CAPACITY)
    }
}
