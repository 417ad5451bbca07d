//! # Type Registry Module
//!
//! Holds the named type definitions that a parsed schema produces, resolves
//! forward declarations (including self- and mutual recursion), and
//! computes the fixed on-disk width every type occupies — both as the
//! primary row of its own table and as a field reference inside a parent
//! composite (its "reference width").
//!
//! Composite fields that point at another composite, an array, a string,
//! or an interface never inline that value; they store a small fixed-width
//! reference (a row index, an `(start,len)` pair, or a `(tag,index)` pair).
//! This is what makes width computation terminate in a single pass even
//! for cyclic type graphs: a field's reference width never depends on the
//! width of the type it points to.

use std::collections::HashMap;

use crate::codec::PrimitiveKind;
use crate::error::{Error, Result};

/// The byte width (in the parent composite) of a composite/array/string/
/// interface field reference.
pub const COMPOSITE_REF_WIDTH: usize = 8;
pub const ARRAY_REF_WIDTH: usize = 16;
pub const INTERFACE_REF_WIDTH: usize = 16;

/// The byte width of a character slot when a schema doesn't override it
/// (a UTF-32 code point).
pub const DEFAULT_CHAR_WIDTH: usize = 4;

/// A single named, typed field inside a composite or interface body.
#[derive(Debug, Clone)]
pub struct FieldDefinition {
    pub name: String,
    pub type_name: String,
}

/// An ordered set of named fields, the definition of a composite type.
#[derive(Debug, Clone, Default)]
pub struct CompositeDef {
    pub fields: Vec<FieldDefinition>,
}

impl CompositeDef {
    pub fn get_field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// One variant of an enum: a bare tag, or a tag plus a single composite
/// payload (addressed by the name of the synthesized payload composite).
#[derive(Debug, Clone)]
pub struct EnumVariantDef {
    pub name: String,
    pub payload_type: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EnumDef {
    pub variants: Vec<EnumVariantDef>,
}

impl EnumDef {
    pub fn variant_index(&self, name: &str) -> Option<usize> {
        self.variants.iter().position(|v| v.name == name)
    }

    fn has_any_payload(&self) -> bool {
        self.variants.iter().any(|v| v.payload_type.is_some())
    }
}

/// A set of named operations an implementer must support. `instance::build`
/// checks a concrete composite's fields against this list by name and type
/// before dispatching into it; the registry itself only needs interfaces to
/// have a stable 16-byte reference shape.
#[derive(Debug, Clone, Default)]
pub struct InterfaceDef {
    pub operations: Vec<FieldDefinition>,
}

/// A type definition, one per variant the schema DSL can declare.
#[derive(Debug, Clone)]
pub enum TypeDefinition {
    Primitive(PrimitiveKind),
    Alias { base: String },
    Array { element: String },
    /// `character[]`; stored exactly like an array of `character`.
    String,
    Composite(CompositeDef),
    Enum(EnumDef),
    Interface(InterfaceDef),
    /// A rational of two integers of the same named primitive integer type.
    Fraction { int_type: String },
}

impl TypeDefinition {
    pub fn as_composite(&self) -> Option<&CompositeDef> {
        match self {
            TypeDefinition::Composite(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&EnumDef> {
        match self {
            TypeDefinition::Enum(e) => Some(e),
            _ => None,
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            TypeDefinition::Primitive(_) => "primitive",
            TypeDefinition::Alias { .. } => "alias",
            TypeDefinition::Array { .. } => "array",
            TypeDefinition::String => "string",
            TypeDefinition::Composite(_) => "composite",
            TypeDefinition::Enum(_) => "enum",
            TypeDefinition::Interface(_) => "interface",
            TypeDefinition::Fraction { .. } => "fraction",
        }
    }
}

/// A name → type-definition registry built while parsing a schema. Forward
/// declarations ([`TypeRegistry::forward`]) create a placeholder that later
/// definitions may reference; [`TypeRegistry::define`] resolves the
/// placeholder in place. [`TypeRegistry::finalize`] checks that every
/// forward declaration was eventually satisfied and assigns stable
/// interface-dispatch tags.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    order: Vec<String>,
    entries: HashMap<String, Option<TypeDefinition>>,
    tags: HashMap<String, u64>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` as forward-declared with no definition yet. A
    /// no-op if `name` is already known (forward or defined).
    pub fn forward(&mut self, name: &str) {
        if !self.entries.contains_key(name) {
            self.order.push(name.to_owned());
            self.entries.insert(name.to_owned(), None);
            self.assign_tag(name);
        }
    }

    /// Defines `name` as `def`. If `name` was forward-declared, the
    /// placeholder is resolved in place. Redefining an already-defined
    /// name is a [`Error::Type`].
    pub fn define(&mut self, name: &str, def: TypeDefinition) -> Result<()> {
        match self.entries.get(name) {
            Some(Some(_)) => {
                return Err(Error::Type(format!("type '{name}' is already defined")))
            }
            Some(None) => {
                self.entries.insert(name.to_owned(), Some(def));
            }
            None => {
                self.order.push(name.to_owned());
                self.entries.insert(name.to_owned(), Some(def));
                self.assign_tag(name);
            }
        }
        Ok(())
    }

    fn assign_tag(&mut self, name: &str) {
        if !self.tags.contains_key(name) {
            let next = self.tags.len() as u64;
            self.tags.insert(name.to_owned(), next);
        }
    }

    /// Returns the stable small-integer dispatch tag for `name`, assigning
    /// one on first use if necessary.
    pub fn type_tag(&mut self, name: &str) -> u64 {
        if let Some(t) = self.tags.get(name) {
            return *t;
        }
        let next = self.tags.len() as u64;
        self.tags.insert(name.to_owned(), next);
        next
    }

    /// Looks up the dispatch tag already assigned to `name`, without
    /// assigning a new one. Every forward-declared or defined name has a
    /// tag by construction, so this only misses on a name unknown to the
    /// registry entirely.
    pub fn type_tag_of(&self, name: &str) -> Option<u64> {
        self.tags.get(name).copied()
    }

    pub fn type_name_for_tag(&self, tag: u64) -> Option<&str> {
        self.tags
            .iter()
            .find(|(_, t)| **t == tag)
            .map(|(name, _)| name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        matches!(self.entries.get(name), Some(Some(_)))
    }

    pub fn get(&self, name: &str) -> Option<&TypeDefinition> {
        self.entries.get(name).and_then(|d| d.as_ref())
    }

    pub fn get_or_raise(&self, name: &str) -> Result<&TypeDefinition> {
        self.get(name)
            .ok_or_else(|| Error::Type(format!("undefined type '{name}'")))
    }

    /// Iterates over fully-resolved `(name, definition)` pairs in
    /// registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TypeDefinition)> {
        self.order.iter().filter_map(move |name| {
            self.entries
                .get(name)
                .and_then(|d| d.as_ref())
                .map(|def| (name.as_str(), def))
        })
    }

    /// Verifies every forward declaration was eventually defined.
    pub fn finalize(&self) -> Result<()> {
        for name in &self.order {
            if matches!(self.entries.get(name), Some(None)) {
                return Err(Error::UnresolvedType(name.clone()));
            }
        }
        Ok(())
    }

    /// Resolves `name` through zero or more alias indirections down to its
    /// non-alias base type definition.
    pub fn resolve_base<'a>(&'a self, name: &'a str) -> Result<(&'a str, &'a TypeDefinition)> {
        let mut current = name;
        let mut seen = vec![current.to_owned()];
        loop {
            let def = self.get_or_raise(current)?;
            match def {
                TypeDefinition::Alias { base } => {
                    if seen.contains(base) {
                        return Err(Error::Type(format!(
                            "cyclic alias chain starting at '{name}'"
                        )));
                    }
                    seen.push(base.clone());
                    current = base.as_str();
                }
                _ => return Ok((current, def)),
            }
        }
    }

    /// The byte cost of a field of type `name` inside a parent composite
    pub fn reference_width(&self, name: &str) -> Result<usize> {
        let (_, base) = self.resolve_base(name)?;
        match base {
            TypeDefinition::Primitive(kind) => Ok(kind.byte_width()),
            TypeDefinition::Alias { .. } => unreachable!("resolve_base strips aliases"),
            TypeDefinition::Array { .. } | TypeDefinition::String => Ok(ARRAY_REF_WIDTH),
            TypeDefinition::Composite(_) => Ok(COMPOSITE_REF_WIDTH),
            TypeDefinition::Interface(_) => Ok(INTERFACE_REF_WIDTH),
            TypeDefinition::Enum(e) => Ok(tag_byte_width(e.variants.len().max(1))
                + if e.has_any_payload() { COMPOSITE_REF_WIDTH } else { 0 }),
            TypeDefinition::Fraction { int_type } => {
                Ok(2 * self.reference_width(int_type)?)
            }
        }
    }

    /// The width of the primary row stored in `name`'s own backing table.
    /// Differs from [`TypeRegistry::reference_width`] only for composites,
    /// whose own row is the concatenation of all field reference widths
    /// rather than the 8-byte index used to point at one.
    pub fn own_record_width(&self, name: &str) -> Result<usize> {
        let (_, base) = self.resolve_base(name)?;
        match base {
            TypeDefinition::Composite(c) => {
                let mut total = 0;
                for field in &c.fields {
                    total += self.reference_width(&field.type_name)?;
                }
                Ok(total)
            }
            _ => self.reference_width(name),
        }
    }

    /// The row width of the elements table backing an array or string type
    /// named `name`.
    pub fn element_row_width(&self, name: &str) -> Result<usize> {
        let (_, base) = self.resolve_base(name)?;
        match base {
            TypeDefinition::Array { element } => self.reference_width(element),
            TypeDefinition::String => Ok(PrimitiveKind::Char {
                byte_width: DEFAULT_CHAR_WIDTH,
            }
            .byte_width()),
            _ => Err(Error::Type(format!("'{name}' is not an array or string type"))),
        }
    }

    /// The name of the element type of an array/string, suitable for
    /// looking up its own elements table entry codec.
    pub fn element_type_name(&self, name: &str) -> Result<String> {
        let (_, base) = self.resolve_base(name)?;
        match base {
            TypeDefinition::Array { element } => Ok(element.clone()),
            TypeDefinition::String => Ok("character".to_owned()),
            other => Err(Error::Type(format!(
                "'{name}' ({}) is not an array or string type",
                other.kind_name()
            ))),
        }
    }
}

/// Rounds the number of bits needed to represent `k` distinct tags up to
/// the nearest of `{1, 2, 4, 8}` bytes.
pub fn tag_byte_width(k: usize) -> usize {
    let bits_needed = if k <= 1 {
        1
    } else {
        (usize::BITS - (k - 1).leading_zeros()) as usize
    };
    let bytes = (bits_needed + 7) / 8;
    match bytes {
        0 | 1 => 1,
        2 => 2,
        3 | 4 => 4,
        _ => 8,
    }
}

/// Checks that every type name referenced by a field, alias base, array
/// element, enum payload, interface operation, or fraction integer type
/// has at least an entry in `registry` — forward-declared or defined.
/// A name with no entry at all is a [`Error::Type`] "undefined reference";
/// a name that is forward-declared but never defined is instead caught
/// later by [`TypeRegistry::finalize`] as [`Error::UnresolvedType`].
pub fn validate_references(registry: &TypeRegistry) -> Result<()> {
    let check = |name: &str| -> Result<()> {
        if registry.entries.contains_key(name) {
            Ok(())
        } else {
            Err(Error::Type(format!("undefined type reference '{name}'")))
        }
    };
    for (_, def) in registry.iter() {
        match def {
            TypeDefinition::Primitive(_) | TypeDefinition::String => {}
            TypeDefinition::Alias { base } => check(base)?,
            TypeDefinition::Array { element } => check(element)?,
            TypeDefinition::Composite(c) => {
                for f in &c.fields {
                    check(&f.type_name)?;
                }
            }
            TypeDefinition::Enum(e) => {
                for v in &e.variants {
                    if let Some(p) = &v.payload_type {
                        check(p)?;
                    }
                }
            }
            TypeDefinition::Interface(i) => {
                for op in &i.operations {
                    check(&op.type_name)?;
                }
            }
            TypeDefinition::Fraction { int_type } => check(int_type)?,
        }
    }
    Ok(())
}

/// Registers the built-in primitive and `string` type names into `registry`.
/// Schema parsing calls this once before processing user-declared types so
/// that `uint8`, `character[]`-equivalent `string`, etc. are always
/// resolvable without requiring the user to declare them.
pub fn register_builtins(registry: &mut TypeRegistry) -> Result<()> {
    use PrimitiveKind::*;
    let builtins: &[(&str, PrimitiveKind)] = &[
        ("uint1", UInt(1)),
        ("uint8", UInt(8)),
        ("uint16", UInt(16)),
        ("uint32", UInt(32)),
        ("uint64", UInt(64)),
        ("uint128", UInt(128)),
        ("int8", Int(8)),
        ("int16", Int(16)),
        ("int32", Int(32)),
        ("int64", Int(64)),
        ("int128", Int(128)),
        ("float32", Float32),
        ("float64", Float64),
        ("bit", Bit),
        (
            "character",
            Char {
                byte_width: DEFAULT_CHAR_WIDTH,
            },
        ),
    ];
    for (name, kind) in builtins {
        if !registry.contains(name) {
            registry.define(name, TypeDefinition::Primitive(*kind))?;
        }
    }
    if !registry.contains("string") {
        registry.define("string", TypeDefinition::String)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_registry() -> TypeRegistry {
        let mut r = TypeRegistry::new();
        register_builtins(&mut r).unwrap();
        r
    }

    #[test]
    fn alias_reference_width_matches_base() {
        let mut r = base_registry();
        r.define("uuid", TypeDefinition::Alias { base: "uint128".into() })
            .unwrap();
        assert_eq!(r.reference_width("uuid").unwrap(), 16);
    }

    #[test]
    fn composite_reference_width_is_fixed_8() {
        let mut r = base_registry();
        r.define(
            "Point",
            TypeDefinition::Composite(CompositeDef {
                fields: vec![
                    FieldDefinition { name: "x".into(), type_name: "uint32".into() },
                    FieldDefinition { name: "y".into(), type_name: "uint32".into() },
                ],
            }),
        )
        .unwrap();
        assert_eq!(r.reference_width("Point").unwrap(), 8);
        assert_eq!(r.own_record_width("Point").unwrap(), 8);
    }

    #[test]
    fn self_referential_composite_terminates() {
        let mut r = base_registry();
        r.forward("Node");
        r.define(
            "Node",
            TypeDefinition::Composite(CompositeDef {
                fields: vec![
                    FieldDefinition { name: "value".into(), type_name: "uint8".into() },
                    FieldDefinition { name: "next".into(), type_name: "Node".into() },
                ],
            }),
        )
        .unwrap();
        r.finalize().unwrap();
        assert_eq!(r.own_record_width("Node").unwrap(), 1 + COMPOSITE_REF_WIDTH);
    }

    #[test]
    fn mutual_recursion_terminates() {
        let mut r = base_registry();
        r.forward("A");
        r.forward("B");
        r.define(
            "A",
            TypeDefinition::Composite(CompositeDef {
                fields: vec![FieldDefinition { name: "b".into(), type_name: "B".into() }],
            }),
        )
        .unwrap();
        r.define(
            "B",
            TypeDefinition::Composite(CompositeDef {
                fields: vec![FieldDefinition { name: "a".into(), type_name: "A".into() }],
            }),
        )
        .unwrap();
        r.finalize().unwrap();
        assert_eq!(r.own_record_width("A").unwrap(), COMPOSITE_REF_WIDTH);
        assert_eq!(r.own_record_width("B").unwrap(), COMPOSITE_REF_WIDTH);
    }

    #[test]
    fn unresolved_forward_fails_finalize() {
        let mut r = base_registry();
        r.forward("Ghost");
        assert!(matches!(r.finalize(), Err(Error::UnresolvedType(name)) if name == "Ghost"));
    }

    #[test]
    fn redefinition_is_an_error() {
        let mut r = base_registry();
        r.define("Foo", TypeDefinition::Composite(CompositeDef::default())).unwrap();
        assert!(matches!(
            r.define("Foo", TypeDefinition::Composite(CompositeDef::default())),
            Err(Error::Type(_))
        ));
    }

    #[test]
    fn enum_reference_width_rounds_tag_width() {
        let mut r = base_registry();
        r.define(
            "Color",
            TypeDefinition::Enum(EnumDef {
                variants: vec![
                    EnumVariantDef { name: "Red".into(), payload_type: None },
                    EnumVariantDef { name: "Green".into(), payload_type: None },
                    EnumVariantDef { name: "Blue".into(), payload_type: None },
                ],
            }),
        )
        .unwrap();
        // 3 variants need 2 bits -> rounds up to 1 byte, no payload.
        assert_eq!(r.reference_width("Color").unwrap(), 1);
    }
}
