//! AST produced by the schema DSL parser, and its application to a
//! [`TypeRegistry`].

use crate::error::Result;
use crate::types::{
    CompositeDef, EnumDef, EnumVariantDef, FieldDefinition, InterfaceDef, TypeDefinition,
    TypeRegistry,
};

/// A `type_ref` from the grammar: either a bare name, or `name[]`.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeRef {
    Named(String),
    Array(String),
}

/// A `field` from the grammar. `type_ref == None` means the field's type
/// is a type of the same name as the field.
#[derive(Debug, Clone)]
pub struct FieldAst {
    pub name: String,
    pub type_ref: Option<TypeRef>,
}

#[derive(Debug, Clone)]
pub struct VariantAst {
    pub name: String,
    pub payload: Option<Vec<FieldAst>>,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Alias { name: String, base: TypeRef },
    Forward { name: String },
    Composite { name: String, fields: Vec<FieldAst> },
    Enum { name: String, variants: Vec<VariantAst> },
    Interface { name: String, fields: Vec<FieldAst> },
}

/// Applies a parsed program to `registry`: forward-declares every
/// top-level name first (so self- and mutual recursion resolve
/// regardless of declaration order), builds each real definition,
/// validates that every reference resolves to a known name, and checks
/// that no forward declaration was left unsatisfied.
pub fn apply_program(stmts: &[Stmt], registry: &mut TypeRegistry) -> Result<()> {
    for stmt in stmts {
        registry.forward(stmt_name(stmt));
    }

    let mut anon = 0usize;
    for stmt in stmts {
        match stmt {
            Stmt::Forward { .. } => {}
            Stmt::Alias { name, base } => {
                let base_name = materialize_type_ref(base, registry, &mut anon)?;
                registry.define(name, TypeDefinition::Alias { base: base_name })?;
            }
            Stmt::Composite { name, fields } => {
                let built = materialize_fields(fields, registry, &mut anon)?;
                registry.define(name, TypeDefinition::Composite(CompositeDef { fields: built }))?;
            }
            Stmt::Enum { name, variants } => {
                let mut built_variants = Vec::with_capacity(variants.len());
                for variant in variants {
                    let payload_type = match &variant.payload {
                        Some(fields) => {
                            let payload_name = format!("{name}.{}", variant.name);
                            let built = materialize_fields(fields, registry, &mut anon)?;
                            registry.define(
                                &payload_name,
                                TypeDefinition::Composite(CompositeDef { fields: built }),
                            )?;
                            Some(payload_name)
                        }
                        None => None,
                    };
                    built_variants.push(EnumVariantDef {
                        name: variant.name.clone(),
                        payload_type,
                    });
                }
                registry.define(name, TypeDefinition::Enum(EnumDef { variants: built_variants }))?;
            }
            Stmt::Interface { name, fields } => {
                let built = materialize_fields(fields, registry, &mut anon)?;
                registry.define(name, TypeDefinition::Interface(InterfaceDef { operations: built }))?;
            }
        }
    }

    crate::types::validate_references(registry)?;
    registry.finalize()
}

fn stmt_name(stmt: &Stmt) -> &str {
    match stmt {
        Stmt::Alias { name, .. }
        | Stmt::Forward { name }
        | Stmt::Composite { name, .. }
        | Stmt::Enum { name, .. }
        | Stmt::Interface { name, .. } => name,
    }
}

fn materialize_fields(
    fields: &[FieldAst],
    registry: &mut TypeRegistry,
    anon: &mut usize,
) -> Result<Vec<FieldDefinition>> {
    let mut built = Vec::with_capacity(fields.len());
    for field in fields {
        let type_name = match &field.type_ref {
            Some(type_ref) => materialize_type_ref(type_ref, registry, anon)?,
            None => field.name.clone(),
        };
        built.push(FieldDefinition {
            name: field.name.clone(),
            type_name,
        });
    }
    Ok(built)
}

/// Resolves a `type_ref` to a concrete registry type name, synthesizing
/// an anonymous array type for an inline `element[]` reference.
fn materialize_type_ref(
    type_ref: &TypeRef,
    registry: &mut TypeRegistry,
    anon: &mut usize,
) -> Result<String> {
    match type_ref {
        TypeRef::Named(name) => Ok(name.clone()),
        TypeRef::Array(element) => {
            let name = format!("__anon_array_{anon}_{element}");
            *anon += 1;
            registry.define(&name, TypeDefinition::Array { element: element.clone() })?;
            Ok(name)
        }
    }
}
