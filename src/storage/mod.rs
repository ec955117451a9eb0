//! Uniform key/value persistence across host environments.
//!
//! Higher stores talk to [`Storage`] only. Which engine sits underneath
//! (native bridge, embedded SQLite, or process memory) is decided once by
//! [`open_storage`] and never leaks upward.

mod backend;
mod bridge;
mod factory;
mod flat;
mod memory;
mod service;
mod sqlite;

pub use factory::{open_storage, StorageOptions};
pub use service::Storage;

#[cfg(test)]
pub use backend::StorageBackend;
#[cfg(test)]
pub use bridge::{FileBridge, NativeBridgeStorage};
#[cfg(test)]
pub use flat::FlatFileStore;
#[cfg(test)]
pub use memory::MemoryStorage;
#[cfg(test)]
pub use sqlite::SqliteStorage;

/// Logical key holding the template collection.
pub const TEMPLATES_KEY: &str = "templates";

/// Logical key holding the structured settings document.
pub const SETTINGS_KEY: &str = "settings";
