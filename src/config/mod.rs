//! Configuration Module
//!
//! Live configuration for a running pipeline. The [`ConfigStore`] owns the
//! authoritative key/value mapping; every stage works against its own
//! [`ConfigSnapshot`], a read-through copy kept current by a bounded update
//! channel. Changes flow one way only: host or stage code mutates the
//! master store, the store's worker fans each change out, and snapshots
//! apply them on their next `refresh`.

pub mod snapshot;
pub mod store;

pub use snapshot::ConfigSnapshot;
pub use store::ConfigStore;

/// Keys starting with an underscore are runtime metadata. They never fan
/// out to snapshots and are never serialized.
pub(crate) fn is_reserved(key: &str) -> bool {
    key.starts_with('_')
}
