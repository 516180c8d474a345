//! Storable types shared by the unit tests.

use std::any::Any;

use nstore_types::Record;

use crate::codec::{Decoder, Encoder};
use crate::error::StoreResult;
use crate::registry::TypeRegistry;
use crate::storable::{ObjectHandle, Storable, StorableType, TypeSchema};

/// Container with ordered children and one extra reference.
#[derive(Debug, Default)]
pub struct Root {
    pub title: String,
    pub children: Vec<ObjectHandle>,
    pub favorite: Option<ObjectHandle>,
}

impl Storable for Root {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn to_record(&self, enc: &mut Encoder<'_>) -> StoreResult<Record> {
        Ok(Record::new(Self::TYPE_NAME)
            .with("title", self.title.as_str())
            .with("children", enc.encode_pids(&self.children)?)
            .with("favorite", enc.encode(self.favorite)?))
    }

    fn load_from_record(&mut self, record: &Record, dec: &mut Decoder<'_>) -> StoreResult<()> {
        self.title = record.text("title").unwrap_or_default().to_string();
        self.children = dec.decode_pids(record, "children")?;
        self.favorite = dec.decode_ref(record, "favorite")?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl StorableType for Root {
    const TYPE_NAME: &'static str = "Root";

    fn schema() -> TypeSchema {
        TypeSchema::new().children("children").reference("favorite")
    }
}

/// Scalar-only object.
#[derive(Debug, Default)]
pub struct Leaf {
    pub name: String,
    pub weight: i64,
}

impl Leaf {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            weight: 0,
        }
    }
}

impl Storable for Leaf {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn to_record(&self, _enc: &mut Encoder<'_>) -> StoreResult<Record> {
        Ok(Record::new(Self::TYPE_NAME)
            .with("name", self.name.as_str())
            .with("weight", self.weight))
    }

    fn load_from_record(&mut self, record: &Record, _dec: &mut Decoder<'_>) -> StoreResult<()> {
        self.name = record.text("name")?.to_string();
        self.weight = record.int("weight")?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl StorableType for Leaf {
    const TYPE_NAME: &'static str = "Leaf";
}

/// Linked node, for cycles. Counts its hook calls.
#[derive(Debug, Default)]
pub struct Node {
    pub label: String,
    pub next: Option<ObjectHandle>,
    pub loads: usize,
    pub stores: usize,
}

impl Node {
    pub fn labeled(label: &str) -> Self {
        Self {
            label: label.to_string(),
            ..Default::default()
        }
    }
}

impl Storable for Node {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn to_record(&self, enc: &mut Encoder<'_>) -> StoreResult<Record> {
        Ok(Record::new(Self::TYPE_NAME)
            .with("label", self.label.as_str())
            .with("next", enc.encode(self.next)?))
    }

    fn load_from_record(&mut self, record: &Record, dec: &mut Decoder<'_>) -> StoreResult<()> {
        self.label = record.text("label")?.to_string();
        self.next = dec.decode_ref(record, "next")?;
        Ok(())
    }

    fn after_store(&mut self, _record: &Record) {
        self.stores += 1;
    }

    fn after_load(&mut self) {
        self.loads += 1;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl StorableType for Node {
    const TYPE_NAME: &'static str = "Node";

    fn schema() -> TypeSchema {
        TypeSchema::new().reference("next")
    }
}

/// Re-dirties another object every time it is stored.
#[derive(Debug, Default)]
pub struct Echo {
    pub poke: Option<ObjectHandle>,
}

impl Storable for Echo {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn to_record(&self, enc: &mut Encoder<'_>) -> StoreResult<Record> {
        if let Some(poke) = self.poke {
            enc.mark_dirty(poke)?;
        }
        Ok(Record::new(Self::TYPE_NAME))
    }

    fn load_from_record(&mut self, _record: &Record, _dec: &mut Decoder<'_>) -> StoreResult<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl StorableType for Echo {
    const TYPE_NAME: &'static str = "Echo";
}

pub fn registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    registry
        .register::<Root>()
        .register::<Leaf>()
        .register::<Node>()
        .register::<Echo>();
    registry
}
