// mapping from identity to channel.

use super::ring::Ring;
use crate::{
    error::{Error, Result},
    identity::Identity,
};
use std::{
    collections::{HashMap, hash_map::Entry},
    mem::size_of,
};


// every channel that has ever been opened, keyed by identity.
//
// channels are created lazily and only freed when the registry itself is dropped. only ever
// accessed under the core's mutex.
pub(crate) struct Registry<I> {
    channels: HashMap<I, Ring>,
    // storage size of newly created channels. validated to be at least 2.
    capacity: usize,
}

impl<I: Identity> Registry<I> {
    pub(crate) fn new(capacity: usize) -> Self {
        Registry {
            channels: HashMap::new(),
            capacity,
        }
    }

    // get the channel for identity, creating it if it doesn't exist yet.
    //
    // on allocation failure the registry is left unchanged.
    pub(crate) fn ensure(&mut self, identity: &I) -> Result<&mut Ring> {
        if !self.channels.contains_key(identity) {
            self.reserve()?;
        }
        match self.channels.entry(identity.clone()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let ring = Ring::try_new(self.capacity)
                    .inspect_err(|e| warn!(?identity, %e, "failed to create channel"))?;
                debug!(?identity, capacity = self.capacity, "creating channel");
                Ok(entry.insert(ring))
            }
        }
    }

    // make room for one more channel, so that inserting it can't abort on allocation failure.
    fn reserve(&mut self) -> Result<()> {
        self.channels
            .try_reserve(1)
            .map_err(|_| Error::AllocationFailure { bytes: size_of::<(I, Ring)>() })
    }

    pub(crate) fn get(&self, identity: &I) -> Option<&Ring> {
        self.channels.get(identity)
    }
}

impl<I> Registry<I> {
    pub(crate) fn len(&self) -> usize {
        self.channels.len()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_is_lazy_and_stable() {
        let mut registry = Registry::<&'static str>::new(4);
        assert_eq!(registry.len(), 0);
        assert!(registry.get(&"a").is_none());

        assert_eq!(registry.ensure(&"a").unwrap().push(b"xy"), 2);
        assert_eq!(registry.len(), 1);

        // existing channel is returned as-is
        assert_eq!(registry.ensure(&"a").unwrap().buffered(), 2);
        assert_eq!(registry.len(), 1);

        // distinct identities are isolated
        assert!(registry.ensure(&"b").unwrap().is_empty());
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(&"a").unwrap().buffered(), 2);
    }

    #[test]
    fn new_channels_use_configured_capacity() {
        let mut registry = Registry::<u32>::new(9);
        assert_eq!(registry.ensure(&1).unwrap().capacity(), 9);
        assert_eq!(registry.ensure(&2).unwrap().free(), 8);
    }
}
