//! The dynamic value shape instances are built from and loaded into —
//! the Rust side of a schema-less `dict` the way the query layer and
//! callers outside the type system see record data.

use crate::codec::PrimitiveValue;
use crate::error::{Error, Result};

/// A value passed into [`crate::schema::Schema::create_instance`] or
/// produced by [`crate::instance::InstanceRef::load`].
///
/// [`Value::Ref`] only ever appears in a *loaded* value: it marks a
/// composite or interface field that `load` left unresolved because the
/// caller asked for `resolve_references = false`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Primitive(PrimitiveValue),
    Text(String),
    List(Vec<Value>),
    Struct(Vec<(String, Value)>),
    /// An enum tag, or an interface dispatch: `(variant or concrete type
    /// name, payload)`.
    Variant(String, Option<Box<Value>>),
    Fraction(i128, i128),
    Ref { type_name: String, index: u64 },
}

impl Value {
    pub fn as_primitive(&self) -> Result<PrimitiveValue> {
        match self {
            Value::Primitive(p) => Ok(*p),
            _ => Err(Error::Type("expected a primitive value".into())),
        }
    }

    pub fn as_text(&self) -> Result<&str> {
        match self {
            Value::Text(s) => Ok(s.as_str()),
            _ => Err(Error::Type("expected a text value".into())),
        }
    }

    pub fn as_list(&self) -> Result<&[Value]> {
        match self {
            Value::List(items) => Ok(items.as_slice()),
            _ => Err(Error::Type("expected a list value".into())),
        }
    }

    pub fn as_struct(&self) -> Result<&[(String, Value)]> {
        match self {
            Value::Struct(fields) => Ok(fields.as_slice()),
            _ => Err(Error::Type("expected a struct value".into())),
        }
    }

    /// Looks up a named field of a [`Value::Struct`].
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.as_struct()
            .ok()?
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn as_variant(&self) -> Result<(&str, Option<&Value>)> {
        match self {
            Value::Variant(name, payload) => Ok((name.as_str(), payload.as_deref())),
            _ => Err(Error::Type("expected a variant value".into())),
        }
    }

    pub fn as_fraction(&self) -> Result<(i128, i128)> {
        match self {
            Value::Fraction(n, d) => Ok((*n, *d)),
            _ => Err(Error::Type("expected a fraction value".into())),
        }
    }
}

/// Widens any decoded primitive integer to `i128`, for types (like
/// `Fraction`) that treat their components uniformly regardless of
/// signedness.
pub fn primitive_to_i128(value: PrimitiveValue) -> Result<i128> {
    match value {
        PrimitiveValue::UInt(v) => Ok(v as i128),
        PrimitiveValue::Int(v) => Ok(v),
        _ => Err(Error::Type("expected an integer primitive".into())),
    }
}
