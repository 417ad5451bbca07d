//! # Typed Tables
//!
//! A typed, file-backed store for structured records. A schema of named
//! types — primitives, aliases, arrays, strings, composites, enums,
//! interfaces, fractions — is declared in a small DSL; each type is then
//! materialised as one or more fixed-width append-only binary tables on
//! disk, and a query layer (TTQ) selects, projects, filters, sorts, groups
//! and aggregates across them.
//!
//! The type system and storage engine are the two load-bearing pieces:
//! every composite field is stored as a small fixed-width *reference* (a
//! row index, a `(start,len)` pair, or a `(tag,index)` pair) rather than
//! an inlined value, which is what lets a row stay fixed-width even when
//! the schema is logically recursive or variable-size. See
//! [`types`] for width computation and [`instance`] for how a reference is
//! built and later dereferenced.
//!
//! ## Module map
//!
//! - [`codec`] — primitive encode/decode
//! - [`table`] — [`table::Table`], [`table::ArrayTable`]
//! - [`storage`] — [`storage::StorageManager`], `schema.meta` read/write
//! - [`types`] — [`types::TypeDefinition`], [`types::TypeRegistry`]
//! - [`schema_dsl`] — lexer + parser for the type-definition DSL
//! - [`schema`] — the [`schema::Schema`] facade
//! - [`instance`] — [`instance::InstanceRef`] and deep load
//! - [`query`] — TTQ lexer, parser, AST, and executor
//! - [`value`] — the dynamic [`value::Value`] shape records are built from
//!   and loaded into
//! - [`error`] — the error taxonomy
//!
//! No binary target is built here. The TTQ REPL, language server, JSON
//! importer, TTG/TTGE graph-expression DSL, and TTGC config parser are
//! external collaborators; this crate exposes the interfaces they need
//! ([`schema::Schema::parse`], [`query::QueryParser::parse`],
//! [`query::QueryParser::parse_program`], [`query::QueryExecutor::execute`])
//! and goes no further.

pub mod codec;
pub mod error;
pub mod instance;
pub mod query;
pub mod schema;
pub mod schema_dsl;
pub mod storage;
pub mod table;
pub mod types;
pub mod value;

pub use error::{Error, Result};
pub use instance::InstanceRef;
pub use schema::Schema;
