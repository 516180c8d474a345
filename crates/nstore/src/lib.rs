//! Object-graph persistence for nstore.
//!
//! An [`ObjectStore`] keeps a graph of live [`Storable`] objects in sync
//! with a transactional key-value [`BackingStore`](nstore_backing::BackingStore).
//! Objects get a persistent id only when something needs to refer to them,
//! are written in debounced, all-or-nothing batches, and are loaded back on
//! demand as a single live instance per pid, cycles included.
//!
//! # Key Types
//!
//! - [`ObjectStore`] -- lifecycle, lookup, dirty tracking, flush, collection
//! - [`Storable`] / [`StorableType`] -- what a persisted type implements
//! - [`TypeRegistry`] -- type name to factory and edge schema
//! - [`Encoder`] / [`Decoder`] -- reference codec contexts
//! - [`Collector`] -- mark-sweep over raw records from the root pids
//!
//! # Design Rules
//!
//! 1. At most one live object per pid.
//! 2. A flush either commits every dirty object or none of them.
//! 3. Collection reads only what has been flushed; live objects never keep
//!    a record alive.
//! 4. Keys starting with `_` are roots and are never collected.

pub mod cache;
pub mod codec;
pub mod collector;
pub mod config;
pub mod dirty;
pub mod error;
pub mod event;
pub mod inspect;
pub mod registry;
pub mod scheduler;
pub mod stats;
pub mod storable;
pub mod store;

#[cfg(test)]
mod fixtures;

pub use cache::ActiveObjectCache;
pub use codec::{pid_refs_of, Decoded, Decoder, Encodable, Encoder};
pub use collector::{CollectReport, Collector};
pub use config::{CorruptionPolicy, StoreConfig};
pub use dirty::DirtySet;
pub use error::{StoreError, StoreResult};
pub use event::{EventStream, StoreEvent};
pub use inspect::{Dangling, VerifyReport};
pub use registry::TypeRegistry;
pub use scheduler::{Task, WriteScheduler};
pub use stats::{format_bytes, StoreStats};
pub use storable::{ObjectHandle, Storable, StorableType, TypeSchema};
pub use store::ObjectStore;
