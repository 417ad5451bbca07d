//! Tokenizer for the TTQ query DSL.
//!
//! Unlike the schema DSL, newlines are significant here (a statement
//! separator is `;` *or* a newline), so they are tokenized rather than
//! skipped.

use logos::Logos;

use crate::error::{Error, Result};

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r]+")]
#[logos(skip r"#[^\n]*")]
#[logos(skip r"--[^\n]*")]
pub enum Token {
    #[regex(r"\n+")]
    Newline,
    #[token(";")]
    Semicolon,

    #[token("use")]
    Use,
    #[token("as")]
    As,
    #[token("temp")]
    Temp,
    #[token("type")]
    Type,
    #[token("create")]
    Create,
    #[token("from")]
    From,
    #[token("select")]
    Select,
    #[token("where")]
    Where,
    #[token("sort")]
    Sort,
    #[token("by")]
    By,
    #[token("asc")]
    Asc,
    #[token("desc")]
    Desc,
    #[token("group")]
    Group,
    #[token("update")]
    Update,
    #[token("set")]
    Set,
    #[token("execute")]
    Execute,
    #[token("dump")]
    Dump,
    #[token("import")]
    Import,
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("not")]
    Not,
    #[token("starts")]
    Starts,
    #[token("ends")]
    Ends,
    #[token("with")]
    With,
    #[token("contains")]
    Contains,
    #[token("matches")]
    Matches,
    #[token("true")]
    True,
    #[token("false")]
    False,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token("=")]
    Equals,
    #[token("!=")]
    NotEquals,
    #[token("<=")]
    LessEqual,
    #[token("<")]
    Less,
    #[token(">=")]
    GreaterEqual,
    #[token(">")]
    Greater,
    #[token("*")]
    Star,

    /// A raw numeric literal, suffix included if present (e.g. `42u8`,
    /// `3.5f64`), split apart during parsing.
    #[regex(r"[0-9]+(\.[0-9]+)?[a-zA-Z0-9]*", |lex| lex.slice().to_owned())]
    Number(String),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape(lex.slice()))]
    StringLit(String),

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_owned())]
    Identifier(String),
}

fn unescape(raw: &str) -> String {
    let inner = &raw[1..raw.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    pub start: usize,
    pub end: usize,
}

pub fn tokenize(source: &str) -> Result<Vec<Spanned>> {
    let mut out = Vec::new();
    let mut lexer = Token::lexer(source);
    while let Some(result) = lexer.next() {
        match result {
            Ok(token) => out.push(Spanned {
                token,
                start: lexer.span().start,
                end: lexer.span().end,
            }),
            Err(_) => {
                let (line, column) = line_col(source, lexer.span().start);
                return Err(Error::Syntax {
                    line,
                    column,
                    message: format!("illegal token '{}'", lexer.slice()),
                });
            }
        }
    }
    Ok(out)
}

pub fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;
    for ch in source[..offset.min(source.len())].chars() {
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}
