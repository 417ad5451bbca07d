//! The type definition DSL: lexer, AST, and parser, wired together behind
//! a single [`parse`] entry point used by [`crate::schema::Schema`].

mod ast;
mod lexer;
mod parser;

use crate::error::Result;
use crate::types::TypeRegistry;

pub use ast::{FieldAst, Stmt, TypeRef, VariantAst};

/// Parses `source` and applies every declaration it contains to
/// `registry`, in two passes: all names are forward-declared first, so
/// declaration order never matters for self- or mutual recursion.
pub fn parse(source: &str, registry: &mut TypeRegistry) -> Result<()> {
    let stmts = parser::TypeParser::new().parse_program(source)?;
    ast::apply_program(&stmts, registry)
}
