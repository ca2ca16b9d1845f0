// implementation of the exchange.
//
// the architecture is as such:
//
// exchange and handles wrap around Arc<Core>
//                                        |
//          /-----------------------------/
//          v
//        core
//          |
//          |------ it contains a Mutex<Registry>. the registry maps each identity to its ring,
//          |       the circular byte buffer of that identity's channel. every cursor and flag of
//          |       every ring is only touched with this one mutex held.
//          |
//          \------ it contains two condvars, data_available and space_available. they are
//                  broadcast for all channels at once, so every waiter loops: sleep, re-acquire,
//                  re-check its own channel.
//
// the organization of these modules is as such:
//
//      ring<-------registry<-------core: Runs the read and write algorithms under the lock.
//                                   ^    Panic-free, but takes identities and interrupt flags
//      wait<------------------------/    raw.
//                                   |
//                                  api: The dispatch layer. Resolves the caller's identity (or
//                                   ^   the pinned privileged one), enforces access modes, and
//                                   |   marks end-of-stream on close. The crate re-exports this
//                                   |   API publically.
//                                   |
//                                future: Async adapters over api for tokio callers.

pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod future;
pub(crate) mod wait;

mod registry;
mod ring;
