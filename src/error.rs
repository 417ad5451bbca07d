//! # Error Module
//!
//! Defines the error taxonomy surfaced by every public operation in this
//! crate. Every kind named in the storage and query design is a distinct
//! variant here rather than an opaque, type-erased error, since callers
//! (and tests) distinguish on the kind, not just the message.

use std::io;

use thiserror::Error;

/// The result type returned by every fallible operation in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The error taxonomy for the typed tables storage and query engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Ill-formed DSL text encountered by a lexer or parser.
    #[error("syntax error at line {line}, column {column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    /// A registry-level type error: redefinition, an undefined reference,
    /// or an interface-contract violation.
    #[error("type error: {0}")]
    Type(String),

    /// A type was forward-declared but never given a real definition.
    #[error("unresolved forward declaration: '{0}'")]
    UnresolvedType(String),

    /// A value fell outside the declared range of its primitive type.
    #[error("value {value} is out of range for {type_name} ({min}..={max})")]
    Range {
        type_name: &'static str,
        value: i128,
        min: i128,
        max: i128,
    },

    /// A byte buffer handed to the codec was not exactly the expected width.
    #[error("width mismatch: expected {expected} bytes, got {actual}")]
    WidthMismatch { expected: usize, actual: usize },

    /// A table index fell outside `[0, count)`.
    #[error("index {index} out of range (table has {count} records)")]
    Index { index: u64, count: u64 },

    /// An underlying I/O failure while reading or writing a table or the
    /// schema metadata file.
    #[error("storage error: {0}")]
    Storage(#[from] io::Error),

    /// A semantically invalid query: an unknown field, an aggregate mixed
    /// with a non-group column, or an unsupported comparison.
    #[error("query error: {0}")]
    Query(String),
}
