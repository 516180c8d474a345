use std::any::Any;
use std::fmt;

use nstore_types::Record;

use crate::codec::{Decoder, Encoder};
use crate::error::StoreResult;

/// Ephemeral identity of a live object: its index in the store's arena.
///
/// Handles are only meaningful to the store that issued them and are never
/// persisted. Arena slots are not reused, so a handle keeps naming the same
/// object (or nothing, once evicted) for the store's lifetime.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectHandle(usize);

impl ObjectHandle {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    /// The arena index.
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectHandle(#{})", self.0)
    }
}

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which fields of a type's records hold graph edges.
///
/// The collector reads these from raw records to find referenced pids
/// without instantiating anything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TypeSchema {
    /// Fields holding a single reference token.
    pub reference_fields: Vec<String>,
    /// Field holding an ordered pid sequence of children.
    pub children_field: Option<String>,
}

impl TypeSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reference(mut self, field: impl Into<String>) -> Self {
        self.reference_fields.push(field.into());
        self
    }

    pub fn children(mut self, field: impl Into<String>) -> Self {
        self.children_field = Some(field.into());
        self
    }
}

/// An object whose state can be persisted by an
/// [`ObjectStore`](crate::ObjectStore).
///
/// References to other storable objects are held as [`ObjectHandle`]s and
/// turned into pid tokens by the [`Encoder`]; the [`Decoder`] turns them
/// back into handles, loading targets on demand.
pub trait Storable: Any + Send {
    /// Type discriminator written to the record's `type` key.
    fn type_name(&self) -> &'static str;

    /// Serialize this object's state.
    fn to_record(&self, enc: &mut Encoder<'_>) -> StoreResult<Record>;

    /// Populate this freshly constructed object from a stored record.
    fn load_from_record(&mut self, record: &Record, dec: &mut Decoder<'_>) -> StoreResult<()>;

    /// Called with the record just before it is written.
    fn before_store(&mut self, _record: &mut Record) {}

    /// Called with the record just after it is written.
    fn after_store(&mut self, _record: &Record) {}

    /// Called once the outermost lookup that loaded this object completes.
    fn after_load(&mut self) {}

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A concrete storable type that can be registered with a
/// [`TypeRegistry`](crate::TypeRegistry).
pub trait StorableType: Storable + Default {
    const TYPE_NAME: &'static str;

    /// Edge fields of this type's records.
    fn schema() -> TypeSchema {
        TypeSchema::default()
    }
}
