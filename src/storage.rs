//! # Storage Manager Module
//!
//! Owns a directory of [`Table`]s and [`ArrayTable`]s keyed by type name,
//! and the `schema.meta` file that makes a data directory self-describing
//! — enough to rebuild the [`TypeRegistry`] without the original schema
//! source text.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::trace;

use crate::error::{Error, Result};
use crate::table::{ArrayTable, Table};
use crate::types::{
    register_builtins, CompositeDef, EnumDef, EnumVariantDef, FieldDefinition, InterfaceDef,
    TypeDefinition, TypeRegistry,
};

const SCHEMA_META_MAGIC: &[u8; 4] = b"TTBM";
const SCHEMA_META_VERSION: u32 = 1;

/// A directory of lazily-opened tables backing a single registry's types.
pub struct StorageManager {
    dir: PathBuf,
    registry: Rc<RefCell<TypeRegistry>>,
    tables: HashMap<String, Table>,
    array_tables: HashMap<String, ArrayTable>,
}

impl StorageManager {
    /// Binds a storage manager to `dir` and `registry`. The directory is
    /// created if it does not already exist; no tables are opened yet.
    pub fn open(dir: impl AsRef<Path>, registry: Rc<RefCell<TypeRegistry>>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(StorageManager {
            dir,
            registry,
            tables: HashMap::new(),
            array_tables: HashMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn registry(&self) -> Rc<RefCell<TypeRegistry>> {
        self.registry.clone()
    }

    /// Lazily opens (creating on first use) the primary table for `name`.
    pub fn get_table(&mut self, name: &str) -> Result<&mut Table> {
        if !self.tables.contains_key(name) {
            let width = self.registry.borrow().own_record_width(name)?;
            let path = self.dir.join(format!("{name}.bin"));
            trace!("opening primary table for '{name}' at {:?}", path);
            self.tables.insert(name.to_owned(), Table::open(path, width)?);
        }
        Ok(self.tables.get_mut(name).expect("just inserted"))
    }

    /// Lazily opens (creating on first use) the array/string element table
    /// for `name`. Aliases of an array/string type get their own elements
    /// file, named after the alias rather than the underlying array type.
    pub fn get_array_table(&mut self, name: &str) -> Result<&mut ArrayTable> {
        if !self.array_tables.contains_key(name) {
            let width = self.registry.borrow().element_row_width(name)?;
            let path = self.dir.join(format!("{name}_elements.bin"));
            trace!("opening element table for '{name}' at {:?}", path);
            let elements = Table::open(path, width)?;
            self.array_tables
                .insert(name.to_owned(), ArrayTable::new(elements));
        }
        Ok(self.array_tables.get_mut(name).expect("just inserted"))
    }

    /// Flushes and releases every open table handle.
    pub fn close(&mut self) -> Result<()> {
        for table in self.tables.values_mut() {
            table.close()?;
        }
        for array in self.array_tables.values_mut() {
            array.close()?;
        }
        Ok(())
    }

    /// Writes `schema.meta`: a versioned, self-contained description of
    /// every user-declared type in `registry` (built-in primitives and
    /// `string` are re-registered on load and are not serialized).
    pub fn write_schema_meta(&self) -> Result<()> {
        let registry = self.registry.borrow();
        let path = self.dir.join("schema.meta");
        let bytes = encode_schema_meta(&registry)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Reconstructs a [`TypeRegistry`] from a previously-written
    /// `schema.meta` file in `dir`, without needing the original schema
    /// source text.
    pub fn load_registry(dir: impl AsRef<Path>) -> Result<TypeRegistry> {
        let path = dir.as_ref().join("schema.meta");
        let bytes = std::fs::read(path)?;
        decode_schema_meta(&bytes)
    }
}

/* SCHEMA METADATA ENCODING */

fn builtin_names() -> Result<HashSet<String>> {
    let mut builtins = TypeRegistry::new();
    register_builtins(&mut builtins)?;
    Ok(builtins.iter().map(|(n, _)| n.to_owned()).collect())
}

fn write_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn read_str(buf: &[u8], offset: &mut usize) -> Result<String> {
    let len = read_u32(buf, offset)? as usize;
    let end = *offset + len;
    let bytes = buf
        .get(*offset..end)
        .ok_or_else(|| Error::Type("schema.meta: truncated string".into()))?;
    *offset = end;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| Error::Type("schema.meta: invalid utf-8".into()))
}

fn read_u32(buf: &[u8], offset: &mut usize) -> Result<u32> {
    let end = *offset + 4;
    let bytes: [u8; 4] = buf
        .get(*offset..end)
        .ok_or_else(|| Error::Type("schema.meta: truncated".into()))?
        .try_into()
        .unwrap();
    *offset = end;
    Ok(u32::from_le_bytes(bytes))
}

fn read_u8(buf: &[u8], offset: &mut usize) -> Result<u8> {
    let b = *buf
        .get(*offset)
        .ok_or_else(|| Error::Type("schema.meta: truncated".into()))?;
    *offset += 1;
    Ok(b)
}

fn write_field(buf: &mut Vec<u8>, field: &FieldDefinition) {
    write_str(buf, &field.name);
    write_str(buf, &field.type_name);
}

fn read_field(buf: &[u8], offset: &mut usize) -> Result<FieldDefinition> {
    let name = read_str(buf, offset)?;
    let type_name = read_str(buf, offset)?;
    Ok(FieldDefinition { name, type_name })
}

fn encode_schema_meta(registry: &TypeRegistry) -> Result<Vec<u8>> {
    use crate::codec::PrimitiveKind;

    let skip = builtin_names()?;
    let entries: Vec<_> = registry.iter().filter(|(n, _)| !skip.contains(*n)).collect();

    let mut buf = Vec::new();
    buf.extend_from_slice(SCHEMA_META_MAGIC);
    buf.extend_from_slice(&SCHEMA_META_VERSION.to_le_bytes());
    buf.extend_from_slice(&(entries.len() as u32).to_le_bytes());

    for (name, def) in entries {
        write_str(&mut buf, name);
        match def {
            TypeDefinition::Primitive(kind) => {
                buf.push(0);
                match kind {
                    PrimitiveKind::UInt(w) => {
                        buf.push(0);
                        buf.extend_from_slice(&w.to_le_bytes());
                    }
                    PrimitiveKind::Int(w) => {
                        buf.push(1);
                        buf.extend_from_slice(&w.to_le_bytes());
                    }
                    PrimitiveKind::Float32 => {
                        buf.push(2);
                        buf.extend_from_slice(&0u32.to_le_bytes());
                    }
                    PrimitiveKind::Float64 => {
                        buf.push(3);
                        buf.extend_from_slice(&0u32.to_le_bytes());
                    }
                    PrimitiveKind::Bit => {
                        buf.push(4);
                        buf.extend_from_slice(&0u32.to_le_bytes());
                    }
                    PrimitiveKind::Char { byte_width } => {
                        buf.push(5);
                        buf.extend_from_slice(&(*byte_width as u32).to_le_bytes());
                    }
                }
            }
            TypeDefinition::Alias { base } => {
                buf.push(1);
                write_str(&mut buf, base);
            }
            TypeDefinition::Array { element } => {
                buf.push(2);
                write_str(&mut buf, element);
            }
            TypeDefinition::String => {
                buf.push(3);
            }
            TypeDefinition::Composite(c) => {
                buf.push(4);
                buf.extend_from_slice(&(c.fields.len() as u32).to_le_bytes());
                for field in &c.fields {
                    write_field(&mut buf, field);
                }
            }
            TypeDefinition::Enum(e) => {
                buf.push(5);
                buf.extend_from_slice(&(e.variants.len() as u32).to_le_bytes());
                for variant in &e.variants {
                    write_str(&mut buf, &variant.name);
                    match &variant.payload_type {
                        Some(p) => {
                            buf.push(1);
                            write_str(&mut buf, p);
                        }
                        None => buf.push(0),
                    }
                }
            }
            TypeDefinition::Interface(i) => {
                buf.push(6);
                buf.extend_from_slice(&(i.operations.len() as u32).to_le_bytes());
                for op in &i.operations {
                    write_field(&mut buf, op);
                }
            }
            TypeDefinition::Fraction { int_type } => {
                buf.push(7);
                write_str(&mut buf, int_type);
            }
        }
    }
    Ok(buf)
}

fn decode_schema_meta(bytes: &[u8]) -> Result<TypeRegistry> {
    use crate::codec::PrimitiveKind;

    let mut offset = 0usize;
    let magic = bytes
        .get(0..4)
        .ok_or_else(|| Error::Type("schema.meta: truncated header".into()))?;
    if magic != SCHEMA_META_MAGIC {
        return Err(Error::Type("schema.meta: bad magic".into()));
    }
    offset += 4;
    let version = read_u32(bytes, &mut offset)?;
    if version != SCHEMA_META_VERSION {
        return Err(Error::Type(format!(
            "schema.meta: unsupported version {version}"
        )));
    }
    let count = read_u32(bytes, &mut offset)?;

    // Two-pass: collect every name as a forward declaration first so that
    // self- and mutually-recursive composites resolve regardless of the
    // order entries were written in, then fill in each real definition.
    struct Raw {
        name: String,
        kind: u8,
        start: usize,
    }
    let mut raw = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name = read_str(bytes, &mut offset)?;
        let kind = read_u8(bytes, &mut offset)?;
        let start = offset;
        // Walk past this entry's payload without building it yet.
        skip_payload(bytes, &mut offset, kind)?;
        raw.push(Raw { name, kind, start });
    }

    let mut registry = TypeRegistry::new();
    register_builtins(&mut registry)?;
    for r in &raw {
        registry.forward(&r.name);
    }
    for r in &raw {
        let mut cursor = r.start;
        let def = read_payload(bytes, &mut cursor, r.kind)?;
        registry.define(&r.name, def)?;
    }
    registry.finalize()?;
    Ok(registry)
}

fn skip_payload(bytes: &[u8], offset: &mut usize, kind: u8) -> Result<()> {
    match kind {
        0 => {
            let _ = read_u8(bytes, offset)?;
            let _ = read_u32(bytes, offset)?;
        }
        1 => {
            let _ = read_str(bytes, offset)?;
        }
        2 => {
            let _ = read_str(bytes, offset)?;
        }
        3 => {}
        4 => {
            let n = read_u32(bytes, offset)?;
            for _ in 0..n {
                let _ = read_field(bytes, offset)?;
            }
        }
        5 => {
            let n = read_u32(bytes, offset)?;
            for _ in 0..n {
                let _ = read_str(bytes, offset)?;
                let has = read_u8(bytes, offset)?;
                if has == 1 {
                    let _ = read_str(bytes, offset)?;
                }
            }
        }
        6 => {
            let n = read_u32(bytes, offset)?;
            for _ in 0..n {
                let _ = read_field(bytes, offset)?;
            }
        }
        7 => {
            let _ = read_str(bytes, offset)?;
        }
        other => return Err(Error::Type(format!("schema.meta: unknown type kind {other}"))),
    }
    Ok(())
}

fn read_payload(bytes: &[u8], offset: &mut usize, kind: u8) -> Result<TypeDefinition> {
    use crate::codec::PrimitiveKind;
    Ok(match kind {
        0 => {
            let sub = read_u8(bytes, offset)?;
            let w = read_u32(bytes, offset)?;
            let prim = match sub {
                0 => PrimitiveKind::UInt(w),
                1 => PrimitiveKind::Int(w),
                2 => PrimitiveKind::Float32,
                3 => PrimitiveKind::Float64,
                4 => PrimitiveKind::Bit,
                5 => PrimitiveKind::Char { byte_width: w as usize },
                other => {
                    return Err(Error::Type(format!(
                        "schema.meta: unknown primitive kind {other}"
                    )))
                }
            };
            TypeDefinition::Primitive(prim)
        }
        1 => TypeDefinition::Alias {
            base: read_str(bytes, offset)?,
        },
        2 => TypeDefinition::Array {
            element: read_str(bytes, offset)?,
        },
        3 => TypeDefinition::String,
        4 => {
            let n = read_u32(bytes, offset)?;
            let mut fields = Vec::with_capacity(n as usize);
            for _ in 0..n {
                fields.push(read_field(bytes, offset)?);
            }
            TypeDefinition::Composite(CompositeDef { fields })
        }
        5 => {
            let n = read_u32(bytes, offset)?;
            let mut variants = Vec::with_capacity(n as usize);
            for _ in 0..n {
                let name = read_str(bytes, offset)?;
                let has = read_u8(bytes, offset)?;
                let payload_type = if has == 1 {
                    Some(read_str(bytes, offset)?)
                } else {
                    None
                };
                variants.push(EnumVariantDef { name, payload_type });
            }
            TypeDefinition::Enum(EnumDef { variants })
        }
        6 => {
            let n = read_u32(bytes, offset)?;
            let mut operations = Vec::with_capacity(n as usize);
            for _ in 0..n {
                operations.push(read_field(bytes, offset)?);
            }
            TypeDefinition::Interface(InterfaceDef { operations })
        }
        7 => TypeDefinition::Fraction {
            int_type: read_str(bytes, offset)?,
        },
        other => return Err(Error::Type(format!("schema.meta: unknown type kind {other}"))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CompositeDef, FieldDefinition, TypeDefinition};
    use tempfile::tempdir;

    #[test]
    fn table_filenames_follow_policy() {
        let dir = tempdir().unwrap();
        let mut registry = TypeRegistry::new();
        register_builtins(&mut registry).unwrap();
        registry
            .define(
                "name",
                TypeDefinition::Alias {
                    base: "string".into(),
                },
            )
            .unwrap();
        registry
            .define(
                "Person",
                TypeDefinition::Composite(CompositeDef {
                    fields: vec![FieldDefinition {
                        name: "name".into(),
                        type_name: "name".into(),
                    }],
                }),
            )
            .unwrap();
        let registry = Rc::new(RefCell::new(registry));
        let mut storage = StorageManager::open(dir.path(), registry).unwrap();
        storage.get_table("Person").unwrap();
        storage.get_array_table("name").unwrap();
        assert!(dir.path().join("Person.bin").exists());
        assert!(dir.path().join("name_elements.bin").exists());
    }

    #[test]
    fn schema_meta_round_trips_recursive_types() {
        let dir = tempdir().unwrap();
        let mut registry = TypeRegistry::new();
        register_builtins(&mut registry).unwrap();
        registry.forward("Node");
        registry
            .define(
                "Node",
                TypeDefinition::Composite(CompositeDef {
                    fields: vec![
                        FieldDefinition {
                            name: "value".into(),
                            type_name: "uint8".into(),
                        },
                        FieldDefinition {
                            name: "children".into(),
                            type_name: "NodeArray".into(),
                        },
                    ],
                }),
            )
            .unwrap();
        registry
            .define(
                "NodeArray",
                TypeDefinition::Array {
                    element: "Node".into(),
                },
            )
            .unwrap();
        registry.finalize().unwrap();

        let registry = Rc::new(RefCell::new(registry));
        let storage = StorageManager::open(dir.path(), registry.clone()).unwrap();
        storage.write_schema_meta().unwrap();

        let reloaded = StorageManager::load_registry(dir.path()).unwrap();
        assert!(reloaded.contains("Node"));
        assert!(reloaded.contains("NodeArray"));
        assert_eq!(
            reloaded.own_record_width("Node").unwrap(),
            registry.borrow().own_record_width("Node").unwrap()
        );
    }
}
