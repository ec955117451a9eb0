//! Two-tier TTL cache for remote results.
//!
//! Entries live in process memory and are mirrored into the storage service
//! under the [`CACHE_PREFIX`] namespace, so a restart within the TTL still
//! avoids the network round trip.

mod entry;
mod keys;
mod store;

#[cfg(test)]
pub use entry::ManualClock;
pub use keys::scoped_key;
pub use store::CacheStore;
