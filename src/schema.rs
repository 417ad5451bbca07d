//! # Schema Module
//!
//! The facade callers actually hold: a parsed type registry bound to a
//! storage directory, with construction and lookup entry points that
//! hide the registry/storage plumbing [`crate::instance::InstanceRef`]
//! needs.
//!
//! A `Schema` owns its [`StorageManager`] for as long as it's alive.
//! Every exit path — including an error partway through parsing or
//! opening — releases the open table handles via `Drop`.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use log::info;

use crate::error::Result;
use crate::instance::{self, InstanceRef};
use crate::schema_dsl;
use crate::storage::StorageManager;
use crate::types::{register_builtins, TypeRegistry};
use crate::value::Value;

/// A parsed schema bound to a data directory: the type registry it
/// declares, plus the tables that back it.
pub struct Schema {
    registry: Rc<RefCell<TypeRegistry>>,
    storage: Rc<RefCell<StorageManager>>,
}

impl Schema {
    /// Parses `source` and opens `dir` as its backing storage,
    /// registering the built-in primitive types first so schema text
    /// never needs to declare them. Writes `schema.meta` once parsing
    /// succeeds, so a later [`Schema::open`] can reconstruct the
    /// registry without the original source text.
    pub fn parse(source: &str, dir: impl AsRef<Path>) -> Result<Self> {
        let mut registry = TypeRegistry::new();
        register_builtins(&mut registry)?;
        schema_dsl::parse(source, &mut registry)?;
        let registry = Rc::new(RefCell::new(registry));
        let storage = StorageManager::open(dir, registry.clone())?;
        storage.write_schema_meta()?;
        info!("schema parsed and opened at {:?}", storage.dir());
        Ok(Schema {
            registry,
            storage: Rc::new(RefCell::new(storage)),
        })
    }

    /// Reopens a directory previously populated by [`Schema::parse`],
    /// rebuilding the type registry from its `schema.meta` file rather
    /// than from schema source text.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let registry = StorageManager::load_registry(dir)?;
        let registry = Rc::new(RefCell::new(registry));
        let storage = StorageManager::open(dir, registry.clone())?;
        info!("schema reopened from {:?}", storage.dir());
        Ok(Schema {
            registry,
            storage: Rc::new(RefCell::new(storage)),
        })
    }

    pub fn registry(&self) -> Rc<RefCell<TypeRegistry>> {
        self.registry.clone()
    }

    /// The shared storage handle backing this schema, for callers (the
    /// query executor) that need to read and write tables directly rather
    /// than going through [`Schema::create_instance`]/[`Schema::get_instance`].
    pub(crate) fn storage(&self) -> Rc<RefCell<StorageManager>> {
        self.storage.clone()
    }

    /// Builds a new instance of `type_name` from `value`, inserting
    /// whatever rows the type's shape requires, and returns a reference
    /// to it.
    pub fn create_instance(&self, type_name: &str, value: &Value) -> Result<InstanceRef> {
        let registry = self.registry.borrow();
        let mut storage = self.storage.borrow_mut();
        let bytes = instance::build(type_name, value, &registry, &mut storage)?;
        let (_, base) = registry.resolve_base(type_name)?;
        let index = if base.as_composite().is_some() {
            u64::from_le_bytes(bytes.as_slice().try_into().map_err(|_| {
                crate::error::Error::WidthMismatch {
                    expected: 8,
                    actual: bytes.len(),
                }
            })?)
        } else {
            storage.get_table(type_name)?.insert(&bytes)?
        };
        drop(storage);
        drop(registry);
        Ok(InstanceRef::new(
            self.registry.clone(),
            self.storage.clone(),
            type_name,
            index,
        ))
    }

    /// Builds an [`InstanceRef`] for an already-stored row, without any
    /// I/O — `load` on the result will be the first access to it.
    pub fn get_instance(&self, type_name: &str, index: u64) -> InstanceRef {
        InstanceRef::new(self.registry.clone(), self.storage.clone(), type_name, index)
    }

    /// Flushes and releases every open table. Called automatically on
    /// drop; exposed directly so callers can observe I/O errors instead
    /// of having them swallowed by `Drop`.
    pub fn close(&self) -> Result<()> {
        self.storage.borrow_mut().close()
    }
}

impl Drop for Schema {
    fn drop(&mut self) {
        let _ = self.storage.borrow_mut().close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PrimitiveValue;
    use tempfile::tempdir;

    fn point_schema(dir: &Path) -> Schema {
        Schema::parse(
            "type Point {\n    x: int32,\n    y: int32\n}",
            dir,
        )
        .unwrap()
    }

    #[test]
    fn creates_and_loads_a_flat_composite() {
        let dir = tempdir().unwrap();
        let schema = point_schema(dir.path());
        let value = Value::Struct(vec![
            ("x".into(), Value::Primitive(PrimitiveValue::Int(3))),
            ("y".into(), Value::Primitive(PrimitiveValue::Int(-7))),
        ]);
        let instance = schema.create_instance("Point", &value).unwrap();
        assert_eq!(instance.index(), 0);
        let loaded = instance.load(true).unwrap();
        assert_eq!(loaded.field("x").unwrap().as_primitive().unwrap(), PrimitiveValue::Int(3));
        assert_eq!(loaded.field("y").unwrap().as_primitive().unwrap(), PrimitiveValue::Int(-7));
    }

    #[test]
    fn reopen_reconstructs_registry_and_reads_existing_rows() {
        let dir = tempdir().unwrap();
        {
            let schema = point_schema(dir.path());
            let value = Value::Struct(vec![
                ("x".into(), Value::Primitive(PrimitiveValue::Int(1))),
                ("y".into(), Value::Primitive(PrimitiveValue::Int(2))),
            ]);
            schema.create_instance("Point", &value).unwrap();
        }
        let reopened = Schema::open(dir.path()).unwrap();
        let loaded = reopened.get_instance("Point", 0).load(true).unwrap();
        assert_eq!(loaded.field("x").unwrap().as_primitive().unwrap(), PrimitiveValue::Int(1));
    }

    #[test]
    fn string_field_round_trips() {
        let dir = tempdir().unwrap();
        let schema = Schema::parse("type Person {\n    name: string\n}", dir.path()).unwrap();
        let value = Value::Struct(vec![("name".into(), Value::Text("Ada".into()))]);
        let instance = schema.create_instance("Person", &value).unwrap();
        let loaded = instance.load(true).unwrap();
        assert_eq!(loaded.field("name").unwrap().as_text().unwrap(), "Ada");
    }

    #[test]
    fn nested_composite_resolves_or_stays_a_ref() {
        let dir = tempdir().unwrap();
        let schema = Schema::parse(
            "type Inner {\n    value: int32\n}\ntype Outer {\n    inner: Inner\n}",
            dir.path(),
        )
        .unwrap();
        let inner = Value::Struct(vec![("value".into(), Value::Primitive(PrimitiveValue::Int(42)))]);
        let outer = Value::Struct(vec![("inner".into(), inner)]);
        let instance = schema.create_instance("Outer", &outer).unwrap();

        let resolved = instance.load(true).unwrap();
        let inner_value = resolved.field("inner").unwrap();
        assert_eq!(
            inner_value.field("value").unwrap().as_primitive().unwrap(),
            PrimitiveValue::Int(42)
        );

        let shallow = instance.load(false).unwrap();
        match shallow.field("inner").unwrap() {
            Value::Ref { type_name, index } => {
                assert_eq!(type_name, "Inner");
                assert_eq!(*index, 0);
            }
            other => panic!("expected a Ref, got {other:?}"),
        }
    }

    #[test]
    fn recursive_list_of_composites_round_trips() {
        let dir = tempdir().unwrap();
        let schema = Schema::parse(
            "type Leaf {\n    value: int32\n}\nalias Leaves as Leaf[]",
            dir.path(),
        )
        .unwrap();
        let value = Value::List(vec![
            Value::Struct(vec![("value".into(), Value::Primitive(PrimitiveValue::Int(1)))]),
            Value::Struct(vec![("value".into(), Value::Primitive(PrimitiveValue::Int(2)))]),
        ]);
        let instance = schema.create_instance("Leaves", &value).unwrap();
        let loaded = instance.load(true).unwrap();
        let items = loaded.as_list().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[1].field("value").unwrap().as_primitive().unwrap(),
            PrimitiveValue::Int(2)
        );
    }

    #[test]
    fn enum_with_payload_round_trips_both_variants() {
        let dir = tempdir().unwrap();
        let schema = Schema::parse(
            "enum Shape {\n    circle(radius: float64),\n    empty\n}\n\
             type Container {\n    shape: Shape\n}",
            dir.path(),
        )
        .unwrap();

        let circle = Value::Struct(vec![("shape".into(), Value::Variant(
            "circle".into(),
            Some(Box::new(Value::Struct(vec![(
                "radius".into(),
                Value::Primitive(PrimitiveValue::Float64(2.5)),
            )]))),
        ))]);
        let circle_instance = schema.create_instance("Container", &circle).unwrap();
        let loaded = circle_instance.load(true).unwrap();
        match loaded.field("shape").unwrap() {
            Value::Variant(name, Some(payload)) => {
                assert_eq!(name, "circle");
                assert_eq!(
                    payload.field("radius").unwrap().as_primitive().unwrap(),
                    PrimitiveValue::Float64(2.5)
                );
            }
            other => panic!("expected a payload variant, got {other:?}"),
        }

        let empty = Value::Struct(vec![("shape".into(), Value::Variant("empty".into(), None))]);
        let empty_instance = schema.create_instance("Container", &empty).unwrap();
        let loaded = empty_instance.load(true).unwrap();
        match loaded.field("shape").unwrap() {
            Value::Variant(name, None) => assert_eq!(name, "empty"),
            other => panic!("expected a payload-free variant, got {other:?}"),
        }
    }

    #[test]
    fn interface_dispatches_through_type_tag() {
        let dir = tempdir().unwrap();
        let schema = Schema::parse(
            "interface Shape {\n    area: float64\n}\n\
             type Circle {\n    radius: float64,\n    area: float64\n}\n\
             type Square {\n    side: float64,\n    area: float64\n}\n\
             type Scene {\n    shape: Shape\n}",
            dir.path(),
        )
        .unwrap();

        let circle_value = Value::Struct(vec![("shape".into(), Value::Variant(
            "Circle".into(),
            Some(Box::new(Value::Struct(vec![
                ("radius".into(), Value::Primitive(PrimitiveValue::Float64(3.0))),
                ("area".into(), Value::Primitive(PrimitiveValue::Float64(28.27))),
            ]))),
        ))]);
        let instance = schema.create_instance("Scene", &circle_value).unwrap();
        let loaded = instance.load(true).unwrap();
        match loaded.field("shape").unwrap() {
            Value::Variant(concrete, Some(payload)) => {
                assert_eq!(concrete, "Circle");
                assert_eq!(
                    payload.field("radius").unwrap().as_primitive().unwrap(),
                    PrimitiveValue::Float64(3.0)
                );
            }
            other => panic!("expected interface dispatch to resolve to Circle, got {other:?}"),
        }
    }

    #[test]
    fn interface_rejects_composite_missing_an_operation() {
        let dir = tempdir().unwrap();
        let schema = Schema::parse(
            "interface Shape {\n    area: float64\n}\n\
             type Circle {\n    radius: float64\n}\n\
             type Scene {\n    shape: Shape\n}",
            dir.path(),
        )
        .unwrap();

        let circle_value = Value::Struct(vec![("shape".into(), Value::Variant(
            "Circle".into(),
            Some(Box::new(Value::Struct(vec![(
                "radius".into(),
                Value::Primitive(PrimitiveValue::Float64(3.0)),
            )]))),
        ))]);
        let err = schema.create_instance("Scene", &circle_value).unwrap_err();
        match err {
            crate::error::Error::Type(message) => {
                assert!(message.contains("Circle"));
                assert!(message.contains("area"));
            }
            other => panic!("expected a Type error, got {other:?}"),
        }
    }

    #[test]
    fn composite_rejects_value_with_an_unknown_field() {
        let dir = tempdir().unwrap();
        let schema = point_schema(dir.path());
        let value = Value::Struct(vec![
            ("x".into(), Value::Primitive(PrimitiveValue::Int(3))),
            ("y".into(), Value::Primitive(PrimitiveValue::Int(-7))),
            ("z".into(), Value::Primitive(PrimitiveValue::Int(1))),
        ]);
        let err = schema.create_instance("Point", &value).unwrap_err();
        match err {
            crate::error::Error::Type(message) => assert!(message.contains('z')),
            other => panic!("expected a Type error, got {other:?}"),
        }
    }

    #[test]
    fn fraction_field_round_trips() {
        let dir = tempdir().unwrap();
        let mut registry = crate::types::TypeRegistry::new();
        crate::types::register_builtins(&mut registry).unwrap();
        registry
            .define(
                "Ratio",
                crate::types::TypeDefinition::Fraction {
                    int_type: "int32".into(),
                },
            )
            .unwrap();
        registry
            .define(
                "Recipe",
                crate::types::TypeDefinition::Composite(crate::types::CompositeDef {
                    fields: vec![crate::types::FieldDefinition {
                        name: "scale".into(),
                        type_name: "Ratio".into(),
                    }],
                }),
            )
            .unwrap();
        let registry = Rc::new(RefCell::new(registry));
        let storage = crate::storage::StorageManager::open(dir.path(), registry.clone()).unwrap();
        storage.write_schema_meta().unwrap();
        let schema = Schema {
            registry,
            storage: Rc::new(RefCell::new(storage)),
        };

        let value = Value::Struct(vec![("scale".into(), Value::Fraction(3, 4))]);
        let instance = schema.create_instance("Recipe", &value).unwrap();
        let loaded = instance.load(true).unwrap();
        assert_eq!(loaded.field("scale").unwrap().as_fraction().unwrap(), (3, 4));
    }
}
