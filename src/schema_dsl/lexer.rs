//! Tokenizer for the type definition DSL, generated with `logos`.

use logos::Logos;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"#[^\n]*")]
#[logos(skip r"--[^\n]*")]
pub enum Token {
    #[token("define")]
    Define,
    #[token("alias")]
    Alias,
    #[token("forward")]
    Forward,
    #[token("as")]
    As,
    #[token("type")]
    Type,
    #[token("enum")]
    Enum,
    #[token("interface")]
    Interface,

    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(":")]
    Colon,
    #[token(",")]
    Comma,

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_owned())]
    Identifier(String),
}

/// A token paired with the byte offset it started at, used to compute
/// line/column for syntax error reporting.
#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    pub start: usize,
}

/// Tokenizes `source` in full. Returns [`crate::error::Error::Syntax`] on
/// the first illegal character.
pub fn tokenize(source: &str) -> crate::error::Result<Vec<Spanned>> {
    let mut out = Vec::new();
    let mut lexer = Token::lexer(source);
    while let Some(result) = lexer.next() {
        match result {
            Ok(token) => out.push(Spanned {
                token,
                start: lexer.span().start,
            }),
            Err(_) => {
                let (line, column) = line_col(source, lexer.span().start);
                return Err(crate::error::Error::Syntax {
                    line,
                    column,
                    message: format!("illegal token '{}'", lexer.slice()),
                });
            }
        }
    }
    Ok(out)
}

/// Converts a byte offset into `source` into a 1-based `(line, column)`.
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
