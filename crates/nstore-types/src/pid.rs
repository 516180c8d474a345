use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// First character of every root pid. Keys starting with it are always
/// reachable for garbage collection.
pub const ROOT_SENTINEL: char = '_';

/// Reference-token value standing for the null reference. Never a valid pid.
pub const NULL_PID: &str = "null";

/// Number of random decimal digits in a generated pid.
const RANDOM_DIGITS: u32 = 17;

/// Returns `true` if a raw backing-store key names a root record.
pub fn is_root_key(key: &str) -> bool {
    key.starts_with(ROOT_SENTINEL)
}

/// Persistent identifier naming one stored record.
///
/// Ordinary pids have the form `<TypeName>_<17 decimal digits>` and are
/// generated on demand. Root pids are chosen by the caller and start with
/// [`ROOT_SENTINEL`].
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pid(String);

impl Pid {
    /// Generate a fresh random pid for an object of the given type.
    pub fn generate(type_name: &str) -> Self {
        let bound = 10u64.pow(RANDOM_DIGITS);
        let n = rand::thread_rng().gen_range(0..bound);
        Self(format!("{type_name}_{n:017}"))
    }

    /// Parse an arbitrary pid string read back from storage.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        if s == NULL_PID {
            return Err(TypeError::ReservedPid(s.to_string()));
        }
        if s.is_empty() || s.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(TypeError::InvalidPid(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// Parse a caller-chosen root pid. It must start with [`ROOT_SENTINEL`];
    /// the bare sentinel is a root like any other key passing [`is_root_key`].
    pub fn root(s: &str) -> Result<Self, TypeError> {
        let pid = Self::parse(s)?;
        if !pid.is_root() {
            return Err(TypeError::NotRootPid(s.to_string()));
        }
        Ok(pid)
    }

    /// Returns `true` if this pid is a garbage-collection root.
    pub fn is_root(&self) -> bool {
        is_root_key(&self.0)
    }

    /// The pid as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Type prefix of a generated pid (`"Leaf"` for `Leaf_0123...`).
    ///
    /// Returns `None` for roots and for pids without a `_` separator.
    pub fn type_prefix(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        self.0.rsplit_once('_').map(|(prefix, _)| prefix)
    }
}

impl fmt::Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pid({})", self.0)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Pid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Pid {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Pid> for String {
    fn from(pid: Pid) -> Self {
        pid.0
    }
}
