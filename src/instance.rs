//! # Instance Module
//!
//! A record is addressed by `(type name, row index)` rather than by the
//! value it holds. [`InstanceRef`] is that address, plus the shared
//! registry and storage handles needed to construct one from a
//! [`Value`] or load one back out.
//!
//! Composite and interface fields are the only ones stored *by
//! reference* (a row index, or a tag-plus-index pair) rather than by
//! value: every other type's "reference width" bytes already are its
//! full content, which is why only those two cases need a second table
//! lookup and a `resolve_references` switch during [`InstanceRef::load`].

use std::cell::RefCell;
use std::rc::Rc;

use crate::codec::{self, PrimitiveKind};
use crate::error::{Error, Result};
use crate::storage::StorageManager;
use crate::types::{tag_byte_width, TypeDefinition, TypeRegistry, COMPOSITE_REF_WIDTH};
use crate::value::{primitive_to_i128, Value};

/// An address of one record: the type whose own table it lives in, and
/// its row index within that table.
#[derive(Clone)]
pub struct InstanceRef {
    registry: Rc<RefCell<TypeRegistry>>,
    storage: Rc<RefCell<StorageManager>>,
    type_name: String,
    index: u64,
}

impl std::fmt::Debug for InstanceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceRef")
            .field("type_name", &self.type_name)
            .field("index", &self.index)
            .finish()
    }
}

impl PartialEq for InstanceRef {
    fn eq(&self, other: &Self) -> bool {
        self.type_name == other.type_name && self.index == other.index
    }
}

impl InstanceRef {
    pub(crate) fn new(
        registry: Rc<RefCell<TypeRegistry>>,
        storage: Rc<RefCell<StorageManager>>,
        type_name: impl Into<String>,
        index: u64,
    ) -> Self {
        InstanceRef {
            registry,
            storage,
            type_name: type_name.into(),
            index,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    /// Reads this instance's own row back out and decodes it into a
    /// [`Value`]. When `resolve_references` is `false`, composite and
    /// interface fields stop at [`Value::Ref`] instead of recursing into
    /// the referenced record — useful for shallow inspection of large or
    /// cyclic graphs.
    pub fn load(&self, resolve_references: bool) -> Result<Value> {
        let registry = self.registry.borrow();
        let mut storage = self.storage.borrow_mut();
        let row = storage.get_table(&self.type_name)?.get(self.index)?;
        decode(&self.type_name, &row, &registry, &mut storage, resolve_references)
    }
}

/// Builds the on-disk bytes for `value` as an instance of `type_name`,
/// inserting into whatever tables are needed along the way, and returns
/// exactly `registry.reference_width(type_name)` bytes — the content
/// a parent embeds directly, or (for composites) the 8-byte index of
/// the row just inserted into `type_name`'s own table.
pub(crate) fn build(
    type_name: &str,
    value: &Value,
    registry: &TypeRegistry,
    storage: &mut StorageManager,
) -> Result<Vec<u8>> {
    let (_, base) = registry.resolve_base(type_name)?;
    match base {
        TypeDefinition::Primitive(kind) => codec::encode(value.as_primitive()?, *kind),
        TypeDefinition::String => {
            let text = value.as_text()?;
            let char_width = registry.element_row_width(type_name)?;
            let kind = PrimitiveKind::Char {
                byte_width: char_width,
            };
            let mut encoded = Vec::with_capacity(text.chars().count());
            for ch in text.chars() {
                encoded.push(codec::encode(
                    crate::codec::PrimitiveValue::Char(ch as u32),
                    kind,
                )?);
            }
            let (start, len) = storage.get_array_table(type_name)?.insert(&encoded)?;
            Ok(pair_bytes(start, len))
        }
        TypeDefinition::Array { element } => {
            let element = element.clone();
            let items = value.as_list()?;
            let mut encoded = Vec::with_capacity(items.len());
            for item in items {
                encoded.push(build(&element, item, registry, storage)?);
            }
            let (start, len) = storage.get_array_table(type_name)?.insert(&encoded)?;
            Ok(pair_bytes(start, len))
        }
        TypeDefinition::Composite(_) => {
            let row = build_composite_row(type_name, value, registry, storage)?;
            let index = storage.get_table(type_name)?.insert(&row)?;
            Ok(index.to_le_bytes().to_vec())
        }
        TypeDefinition::Enum(e) => {
            let (variant_name, payload) = value.as_variant()?;
            let variant_index = e.variant_index(variant_name).ok_or_else(|| {
                Error::Type(format!("'{variant_name}' is not a variant of '{type_name}'"))
            })?;
            let tag_width = tag_byte_width(e.variants.len().max(1));
            let mut row = variant_index.to_le_bytes()[..tag_width].to_vec();
            if e.has_any_payload() {
                let variant = &e.variants[variant_index];
                let payload_bytes = match (&variant.payload_type, payload) {
                    (Some(payload_type), Some(payload_value)) => {
                        build(payload_type, payload_value, registry, storage)?
                    }
                    (None, None) => vec![0u8; COMPOSITE_REF_WIDTH],
                    (Some(_), None) => {
                        return Err(Error::Type(format!(
                            "variant '{variant_name}' requires a payload"
                        )))
                    }
                    (None, Some(_)) => {
                        return Err(Error::Type(format!(
                            "variant '{variant_name}' does not take a payload"
                        )))
                    }
                };
                row.extend(payload_bytes);
            }
            Ok(row)
        }
        TypeDefinition::Interface(iface) => {
            let (concrete_name, payload) = value.as_variant()?;
            let payload = payload.ok_or_else(|| {
                Error::Type(format!("interface value for '{type_name}' is missing a payload"))
            })?;
            let concrete_composite = registry
                .get_or_raise(concrete_name)?
                .as_composite()
                .ok_or_else(|| {
                    Error::Type(format!(
                        "'{concrete_name}' does not implement interface '{type_name}'"
                    ))
                })?;
            for op in &iface.operations {
                match concrete_composite.get_field(&op.name) {
                    Some(field) if field.type_name == op.type_name => {}
                    Some(field) => {
                        return Err(Error::Type(format!(
                            "'{concrete_name}' does not implement interface '{type_name}': \
                             field '{}' has type '{}', expected '{}'",
                            op.name, field.type_name, op.type_name
                        )))
                    }
                    None => {
                        return Err(Error::Type(format!(
                            "'{concrete_name}' does not implement interface '{type_name}': \
                             missing operation '{}'",
                            op.name
                        )))
                    }
                }
            }
            let child_bytes = build(concrete_name, payload, registry, storage)?;
            let tag = registry.type_tag_of(concrete_name).ok_or_else(|| {
                Error::Type(format!("'{concrete_name}' is not a known type"))
            })?;
            let mut row = tag.to_le_bytes().to_vec();
            row.extend(child_bytes);
            Ok(row)
        }
        TypeDefinition::Fraction { int_type } => {
            let (num, den) = value.as_fraction()?;
            let kind = primitive_kind_of(int_type, registry)?;
            let mut row = codec::encode(int_as_primitive(num, kind)?, kind)?;
            row.extend(codec::encode(int_as_primitive(den, kind)?, kind)?);
            Ok(row)
        }
        TypeDefinition::Alias { .. } => unreachable!("resolve_base strips aliases"),
    }
}

/// Builds the field-reference row for a composite `type_name` from `value`,
/// without inserting it into that composite's own table. [`build`] uses this
/// for a fresh insert (then appends the row itself); the query executor's
/// `update` uses it directly so it can overwrite an existing index instead
/// of appending a new one.
pub(crate) fn build_composite_row(
    type_name: &str,
    value: &Value,
    registry: &TypeRegistry,
    storage: &mut StorageManager,
) -> Result<Vec<u8>> {
    let (_, base) = registry.resolve_base(type_name)?;
    let composite = base
        .as_composite()
        .ok_or_else(|| Error::Type(format!("'{type_name}' is not a composite type")))?;
    let given = value.as_struct()?;
    if let Some((extra, _)) = given
        .iter()
        .find(|(name, _)| composite.get_field(name).is_none())
    {
        return Err(Error::Type(format!(
            "'{type_name}' has no field '{extra}'"
        )));
    }
    let mut row = Vec::new();
    for field in &composite.fields {
        let field_value = value.field(&field.name).ok_or_else(|| {
            Error::Type(format!("missing field '{}' for type '{type_name}'", field.name))
        })?;
        row.extend(build(&field.type_name, field_value, registry, storage)?);
    }
    Ok(row)
}

/// Decodes `bytes` (already read from `type_name`'s own table) into a
/// [`Value`], recursing into referenced tables as needed.
pub(crate) fn decode_for_executor(
    type_name: &str,
    bytes: &[u8],
    registry: &TypeRegistry,
    storage: &mut StorageManager,
    resolve: bool,
) -> Result<Value> {
    decode(type_name, bytes, registry, storage, resolve)
}

/// Decodes `bytes` (already read from `type_name`'s own table) into a
/// [`Value`], recursing into referenced tables as needed.
fn decode(
    type_name: &str,
    bytes: &[u8],
    registry: &TypeRegistry,
    storage: &mut StorageManager,
    resolve: bool,
) -> Result<Value> {
    let (_, base) = registry.resolve_base(type_name)?;
    match base {
        TypeDefinition::Primitive(kind) => Ok(Value::Primitive(codec::decode(bytes, *kind)?)),
        TypeDefinition::String => {
            let (start, len) = read_pair(bytes)?;
            let char_width = registry.element_row_width(type_name)?;
            let kind = PrimitiveKind::Char {
                byte_width: char_width,
            };
            let rows = storage.get_array_table(type_name)?.get(start, len)?;
            let mut text = String::with_capacity(rows.len());
            for row in rows {
                let decoded = codec::decode(&row, kind)?;
                if let crate::codec::PrimitiveValue::Char(code) = decoded {
                    text.push(char::from_u32(code).unwrap_or('\u{FFFD}'));
                }
            }
            Ok(Value::Text(text))
        }
        TypeDefinition::Array { element } => {
            let element = element.clone();
            let (start, len) = read_pair(bytes)?;
            let rows = storage.get_array_table(type_name)?.get(start, len)?;
            let mut items = Vec::with_capacity(rows.len());
            for row in rows {
                items.push(decode_reference(&element, &row, registry, storage, resolve)?);
            }
            Ok(Value::List(items))
        }
        TypeDefinition::Composite(composite) => {
            let mut offset = 0;
            let mut fields = Vec::with_capacity(composite.fields.len());
            for field in &composite.fields {
                let width = registry.reference_width(&field.type_name)?;
                let slice = bytes.get(offset..offset + width).ok_or_else(|| {
                    Error::WidthMismatch {
                        expected: offset + width,
                        actual: bytes.len(),
                    }
                })?;
                offset += width;
                let value = decode_reference(&field.type_name, slice, registry, storage, resolve)?;
                fields.push((field.name.clone(), value));
            }
            Ok(Value::Struct(fields))
        }
        TypeDefinition::Enum(e) => {
            let tag_width = tag_byte_width(e.variants.len().max(1));
            let variant_index = read_tag(&bytes[..tag_width]) as usize;
            let variant = e
                .variants
                .get(variant_index)
                .ok_or_else(|| Error::Type(format!("unknown enum tag {variant_index} for '{type_name}'")))?;
            let payload = if e.has_any_payload() {
                let payload_bytes = &bytes[tag_width..tag_width + COMPOSITE_REF_WIDTH];
                match &variant.payload_type {
                    Some(payload_type) => Some(Box::new(decode_reference(
                        payload_type,
                        payload_bytes,
                        registry,
                        storage,
                        resolve,
                    )?)),
                    None => None,
                }
            } else {
                None
            };
            Ok(Value::Variant(variant.name.clone(), payload))
        }
        TypeDefinition::Interface(_) => {
            let tag = read_tag(&bytes[..8]);
            let concrete_name = registry
                .type_name_for_tag(tag)
                .ok_or_else(|| Error::Type(format!("unknown interface dispatch tag {tag}")))?
                .to_owned();
            let index_bytes = &bytes[8..16];
            if resolve {
                let index = u64::from_le_bytes(index_bytes.try_into().unwrap());
                let row = storage.get_table(&concrete_name)?.get(index)?;
                let payload = decode(&concrete_name, &row, registry, storage, resolve)?;
                Ok(Value::Variant(concrete_name, Some(Box::new(payload))))
            } else {
                let index = u64::from_le_bytes(index_bytes.try_into().unwrap());
                Ok(Value::Variant(
                    concrete_name.clone(),
                    Some(Box::new(Value::Ref {
                        type_name: concrete_name,
                        index,
                    })),
                ))
            }
        }
        TypeDefinition::Fraction { int_type } => {
            let kind = primitive_kind_of(int_type, registry)?;
            let width = kind.byte_width();
            let num = primitive_to_i128(codec::decode(&bytes[..width], kind)?)?;
            let den = primitive_to_i128(codec::decode(&bytes[width..2 * width], kind)?)?;
            Ok(Value::Fraction(num, den))
        }
        TypeDefinition::Alias { .. } => unreachable!("resolve_base strips aliases"),
    }
}

/// Interprets `slice` as a reference to `type_name`: an 8-byte row index
/// for a composite (resolved into a full [`Value::Struct`] only if
/// `resolve` is set, else left as a [`Value::Ref`]), or the value's own
/// content directly for every other kind.
fn decode_reference(
    type_name: &str,
    slice: &[u8],
    registry: &TypeRegistry,
    storage: &mut StorageManager,
    resolve: bool,
) -> Result<Value> {
    let (_, base) = registry.resolve_base(type_name)?;
    if matches!(base, TypeDefinition::Composite(_)) {
        let index = u64::from_le_bytes(slice.try_into().map_err(|_| Error::WidthMismatch {
            expected: 8,
            actual: slice.len(),
        })?);
        if resolve {
            let row = storage.get_table(type_name)?.get(index)?;
            decode(type_name, &row, registry, storage, resolve)
        } else {
            Ok(Value::Ref {
                type_name: type_name.to_owned(),
                index,
            })
        }
    } else {
        decode(type_name, slice, registry, storage, resolve)
    }
}

fn pair_bytes(start: u64, len: u64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(16);
    bytes.extend_from_slice(&start.to_le_bytes());
    bytes.extend_from_slice(&len.to_le_bytes());
    bytes
}

fn read_pair(bytes: &[u8]) -> Result<(u64, u64)> {
    if bytes.len() != 16 {
        return Err(Error::WidthMismatch {
            expected: 16,
            actual: bytes.len(),
        });
    }
    let start = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
    let len = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
    Ok((start, len))
}

fn read_tag(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf[..bytes.len()].copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

fn primitive_kind_of(type_name: &str, registry: &TypeRegistry) -> Result<PrimitiveKind> {
    let (_, base) = registry.resolve_base(type_name)?;
    match base {
        TypeDefinition::Primitive(kind) => Ok(*kind),
        _ => Err(Error::Type(format!("'{type_name}' is not a primitive integer type"))),
    }
}

fn int_as_primitive(value: i128, kind: PrimitiveKind) -> Result<crate::codec::PrimitiveValue> {
    match kind {
        PrimitiveKind::UInt(_) => Ok(crate::codec::PrimitiveValue::UInt(value as u128)),
        PrimitiveKind::Int(_) => Ok(crate::codec::PrimitiveValue::Int(value)),
        _ => Err(Error::Type("fraction components must be integers".into())),
    }
}
