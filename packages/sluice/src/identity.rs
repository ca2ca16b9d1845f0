//! Caller identities.

use std::{
    fmt::Debug,
    hash::Hash,
};


/// Key that selects a caller's channel
///
/// Implemented for every type with the required bounds. Identities are compared for equality
/// only; no ordering is assumed.
pub trait Identity: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<T: Eq + Hash + Clone + Debug + Send + Sync + 'static> Identity for T {}

/// Resolves the identity of whoever is currently calling into the exchange
///
/// The exchange does not verify identities, it trusts whatever this returns. Any
/// `Fn() -> I + Send + Sync` closure is an identity source.
pub trait IdentitySource<I>: Send + Sync {
    /// Identity of the current caller
    fn current(&self) -> I;
}

impl<I, F> IdentitySource<I> for F
where
    F: Fn() -> I + Send + Sync,
{
    fn current(&self) -> I {
        self()
    }
}
