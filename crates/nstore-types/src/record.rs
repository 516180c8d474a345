//! Serialized object records and the reference tokens embedded in them.
//!
//! A [`Record`] is a JSON object with a `type` discriminator and any number
//! of fields:
//!
//! ```text
//! {
//!   "type": "Thread",
//!   "title": "hello",
//!   "owner": {"pid": "Identity_04823901123098123"},
//!   "draft": {"pid": "null"},
//!   "children": ["Message_00000000000000001", "Message_00000000000000002"]
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::pid::{Pid, NULL_PID};

/// Reserved key marking an object as a reference token.
pub const REF_KEY: &str = "pid";

/// Reserved key carrying a record's type discriminator.
pub const TYPE_KEY: &str = "type";

/// Encoded graph edge: `{"pid": "<pid>"}` or `{"pid": "null"}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefToken {
    pub pid: String,
}

impl RefToken {
    /// The null reference.
    pub fn null() -> Self {
        Self {
            pid: NULL_PID.to_string(),
        }
    }

    /// A reference to the given pid.
    pub fn to(pid: &Pid) -> Self {
        Self {
            pid: pid.as_str().to_string(),
        }
    }

    /// Returns `true` for the null reference.
    pub fn is_null(&self) -> bool {
        self.pid == NULL_PID
    }

    /// The referenced pid, or `None` for the null reference.
    pub fn target(&self) -> Result<Option<Pid>, TypeError> {
        if self.is_null() {
            return Ok(None);
        }
        Pid::parse(&self.pid).map(Some)
    }
}

/// One field of a [`Record`].
///
/// Deserialization tries the variants in order, so a JSON object holding a
/// string under `pid` is always read as a reference and an array of strings
/// is always read as a pid sequence. Anything else is kept verbatim.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Ref(RefToken),
    Pids(Vec<String>),
    Json(serde_json::Value),
}

impl FieldValue {
    /// The reference token, if this field is one.
    pub fn as_ref_token(&self) -> Option<&RefToken> {
        match self {
            Self::Ref(token) => Some(token),
            _ => None,
        }
    }

    /// The pid sequence, if this field is one.
    pub fn as_pids(&self) -> Option<&[String]> {
        match self {
            Self::Pids(pids) => Some(pids),
            _ => None,
        }
    }

    /// Returns `true` for scalar (non-edge) values.
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Self::Ref(_) | Self::Pids(_))
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<RefToken> for FieldValue {
    fn from(v: RefToken) -> Self {
        Self::Ref(v)
    }
}

/// Serialized form of one storable object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl Record {
    /// Create an empty record of the given type.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field insertion.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(field, value);
        self
    }

    /// Insert or replace a field. The `type` key is reserved and ignored.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) {
        let field = field.into();
        if field == TYPE_KEY {
            return;
        }
        self.fields.insert(field, value.into());
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn remove(&mut self, field: &str) -> Option<FieldValue> {
        self.fields.remove(field)
    }

    /// Read a required text field.
    pub fn text(&self, field: &str) -> Result<&str, TypeError> {
        match self.require(field)? {
            FieldValue::Text(s) => Ok(s),
            _ => Err(self.shape_error(field, "string")),
        }
    }

    /// Read a required integer field.
    pub fn int(&self, field: &str) -> Result<i64, TypeError> {
        match self.require(field)? {
            FieldValue::Int(n) => Ok(*n),
            _ => Err(self.shape_error(field, "integer")),
        }
    }

    /// Read a required numeric field, widening integers.
    pub fn float(&self, field: &str) -> Result<f64, TypeError> {
        match self.require(field)? {
            FieldValue::Float(n) => Ok(*n),
            FieldValue::Int(n) => Ok(*n as f64),
            _ => Err(self.shape_error(field, "number")),
        }
    }

    /// Read a required boolean field.
    pub fn bool(&self, field: &str) -> Result<bool, TypeError> {
        match self.require(field)? {
            FieldValue::Bool(b) => Ok(*b),
            _ => Err(self.shape_error(field, "boolean")),
        }
    }

    /// The pid sequence stored under `field`; a missing field is empty.
    pub fn pids(&self, field: &str) -> Result<&[String], TypeError> {
        match self.fields.get(field) {
            None => Ok(&[]),
            Some(FieldValue::Pids(pids)) => Ok(pids),
            Some(_) => Err(self.shape_error(field, "pid sequence")),
        }
    }

    /// Serialize to the persisted JSON text.
    pub fn to_json(&self) -> Result<String, TypeError> {
        serde_json::to_string(self).map_err(|e| TypeError::Serialization(e.to_string()))
    }

    /// Parse persisted JSON text.
    pub fn from_json(json: &str) -> Result<Self, TypeError> {
        serde_json::from_str(json).map_err(|e| TypeError::Serialization(e.to_string()))
    }

    fn require(&self, field: &str) -> Result<&FieldValue, TypeError> {
        self.fields.get(field).ok_or_else(|| TypeError::MissingField {
            type_name: self.type_name.clone(),
            field: field.to_string(),
        })
    }

    fn shape_error(&self, field: &str, expected: &'static str) -> TypeError {
        TypeError::FieldShape {
            type_name: self.type_name.clone(),
            field: field.to_string(),
            expected,
        }
    }
}
