//! Foundation types for nstore.
//!
//! This crate provides the identity and record types shared by the backing
//! stores, the object store, and the command-line tooling.
//!
//! # Key Types
//!
//! - [`Pid`] -- Persistent identifier naming one stored record
//! - [`Record`] -- Serialized form of one storable object
//! - [`FieldValue`] -- A record field: scalar, reference token, or pid sequence
//! - [`RefToken`] -- Encoded graph edge (`{"pid": ...}`), possibly null

pub mod error;
pub mod pid;
pub mod record;

pub use error::TypeError;
pub use pid::{is_root_key, Pid, NULL_PID, ROOT_SENTINEL};
pub use record::{FieldValue, Record, RefToken, REF_KEY, TYPE_KEY};
