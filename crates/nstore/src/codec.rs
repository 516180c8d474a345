//! Reference codec: object references inside records.
//!
//! A reference is written as `{"pid": "<pid>"}`, the null reference as
//! `{"pid": "null"}`, and a child collection as an ordered array of pid
//! strings. Scalars pass through both directions untouched.
//!
//! [`Encoder`] is handed to [`Storable::to_record`](crate::Storable::to_record)
//! during a flush; encoding a reference to an object without a pid gives it
//! one and marks it dirty so it is stored in the next wave. [`Decoder`] is
//! handed to [`Storable::load_from_record`](crate::Storable::load_from_record)
//! and resolves references through the store's lookup. [`pid_refs_of`] reads
//! edges out of a raw record without building anything.

use nstore_backing::BackingStore;
use nstore_types::{FieldValue, Pid, Record, RefToken, TypeError, NULL_PID};
use tracing::debug;

use crate::cache::ActiveObjectCache;
use crate::dirty::DirtySet;
use crate::error::StoreResult;
use crate::storable::{ObjectHandle, TypeSchema};
use crate::store::ObjectStore;

/// A value to encode: a scalar or a (possibly null) object reference.
#[derive(Clone, Debug, PartialEq)]
pub enum Encodable {
    Scalar(FieldValue),
    Object(Option<ObjectHandle>),
}

impl From<FieldValue> for Encodable {
    fn from(value: FieldValue) -> Self {
        Self::Scalar(value)
    }
}

impl From<ObjectHandle> for Encodable {
    fn from(handle: ObjectHandle) -> Self {
        Self::Object(Some(handle))
    }
}

impl From<Option<ObjectHandle>> for Encodable {
    fn from(handle: Option<ObjectHandle>) -> Self {
        Self::Object(handle)
    }
}

/// A decoded field: a scalar or a (possibly null) live object.
#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    Scalar(FieldValue),
    Object(Option<ObjectHandle>),
}

/// Write-side codec context for one object being stored.
pub struct Encoder<'a> {
    cache: &'a mut ActiveObjectCache,
    dirty: &'a mut DirtySet,
    backing: &'a dyn BackingStore,
    this: ObjectHandle,
}

impl<'a> Encoder<'a> {
    pub(crate) fn new(
        cache: &'a mut ActiveObjectCache,
        dirty: &'a mut DirtySet,
        backing: &'a dyn BackingStore,
        this: ObjectHandle,
    ) -> Self {
        Self {
            cache,
            dirty,
            backing,
            this,
        }
    }

    /// Handle of the object being encoded.
    pub fn this(&self) -> ObjectHandle {
        self.this
    }

    /// Encode a scalar or a reference.
    pub fn encode(&mut self, value: impl Into<Encodable>) -> StoreResult<FieldValue> {
        match value.into() {
            Encodable::Scalar(value) => Ok(value),
            Encodable::Object(None) => Ok(FieldValue::Ref(RefToken::null())),
            Encodable::Object(Some(target)) => {
                let pid = self.pid_for(target)?;
                Ok(FieldValue::Ref(RefToken::to(&pid)))
            }
        }
    }

    /// Encode an ordered child collection as a pid sequence.
    pub fn encode_pids(&mut self, targets: &[ObjectHandle]) -> StoreResult<FieldValue> {
        let mut pids: Vec<String> = Vec::with_capacity(targets.len());
        for target in targets {
            pids.push(self.pid_for(*target)?.into());
        }
        Ok(FieldValue::Pids(pids))
    }

    /// The target's pid, assigned on first use. A newly assigned target is
    /// marked dirty.
    pub fn pid_for(&mut self, target: ObjectHandle) -> StoreResult<Pid> {
        let backing = self.backing;
        let (pid, fresh) = self
            .cache
            .assign_pid(target, |p| matches!(backing.has_key(p.as_str()), Ok(true)))?;
        if fresh {
            debug!(%pid, "assigned pid while encoding");
            self.dirty.insert(target);
        }
        Ok(pid)
    }

    /// Queue another object for storage in this flush.
    pub fn mark_dirty(&mut self, handle: ObjectHandle) -> StoreResult<()> {
        self.cache.ensure_live(handle)?;
        self.dirty.insert(handle);
        Ok(())
    }
}

/// Read-side codec context for one object being loaded.
pub struct Decoder<'a> {
    store: &'a mut ObjectStore,
    this: ObjectHandle,
}

impl<'a> Decoder<'a> {
    pub(crate) fn new(store: &'a mut ObjectStore, this: ObjectHandle) -> Self {
        Self { store, this }
    }

    /// Handle of the object being populated.
    pub fn this(&self) -> ObjectHandle {
        self.this
    }

    /// Decode one field value, loading referenced objects as needed.
    pub fn decode(&mut self, value: &FieldValue) -> StoreResult<Decoded> {
        match value {
            FieldValue::Ref(token) => match token.target()? {
                None => Ok(Decoded::Object(None)),
                Some(pid) => Ok(Decoded::Object(self.store.resolve(&pid, Some(self.this))?)),
            },
            other => Ok(Decoded::Scalar(other.clone())),
        }
    }

    /// Decode the reference stored under `field`. A missing field is null.
    pub fn decode_ref(&mut self, record: &Record, field: &str) -> StoreResult<Option<ObjectHandle>> {
        let Some(value) = record.get(field) else {
            return Ok(None);
        };
        match self.decode(value)? {
            Decoded::Object(handle) => Ok(handle),
            Decoded::Scalar(_) => Err(TypeError::FieldShape {
                type_name: record.type_name.clone(),
                field: field.to_string(),
                expected: "reference",
            }
            .into()),
        }
    }

    /// Decode the pid sequence stored under `field`. Entries whose record is
    /// missing are dropped.
    pub fn decode_pids(&mut self, record: &Record, field: &str) -> StoreResult<Vec<ObjectHandle>> {
        let pids = record.pids(field)?;
        let mut handles = Vec::with_capacity(pids.len());
        for raw in pids {
            if raw == NULL_PID {
                continue;
            }
            let pid = Pid::parse(raw)?;
            if let Some(handle) = self.store.resolve(&pid, Some(self.this))? {
                handles.push(handle);
            }
        }
        Ok(handles)
    }
}

/// Pids referenced by a raw record.
///
/// With a schema only the declared reference fields and the children field
/// are read. Without one, every field is scanned so that records of unknown
/// types never hide edges from the collector.
pub fn pid_refs_of(record: &Record, schema: Option<&TypeSchema>) -> Vec<String> {
    let mut pids = Vec::new();
    match schema {
        Some(schema) => {
            let fields = schema
                .reference_fields
                .iter()
                .chain(schema.children_field.iter());
            for field in fields {
                if let Some(value) = record.get(field) {
                    collect_refs(value, &mut pids);
                }
            }
        }
        None => {
            for value in record.fields.values() {
                collect_refs(value, &mut pids);
            }
        }
    }
    pids
}

fn collect_refs(value: &FieldValue, out: &mut Vec<String>) {
    match value {
        FieldValue::Ref(token) if !token.is_null() => out.push(token.pid.clone()),
        FieldValue::Pids(pids) => out.extend(pids.iter().filter(|p| *p != NULL_PID).cloned()),
        _ => {}
    }
}
