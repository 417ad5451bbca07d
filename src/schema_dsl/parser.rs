//! Recursive-descent parser for the type definition DSL, turning token
//! text into the [`Stmt`] AST.

use super::ast::{FieldAst, Stmt, TypeRef, VariantAst};
use super::lexer::{line_col, tokenize, Spanned, Token};
use crate::error::{Error, Result};

pub struct TypeParser;

impl TypeParser {
    pub fn new() -> Self {
        TypeParser
    }

    /// Parses the full program, returning every top-level statement in
    /// declaration order.
    pub fn parse_program(&self, source: &str) -> Result<Vec<Stmt>> {
        let tokens = tokenize(source)?;
        let mut cursor = Cursor { tokens, pos: 0, source };
        let mut stmts = Vec::new();
        while !cursor.at_end() {
            stmts.push(parse_stmt(&mut cursor)?);
        }
        Ok(stmts)
    }
}

impl Default for TypeParser {
    fn default() -> Self {
        Self::new()
    }
}

struct Cursor<'s> {
    tokens: Vec<Spanned>,
    pos: usize,
    source: &'s str,
}

impl<'s> Cursor<'s> {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn error_here(&self, message: impl Into<String>) -> Error {
        let offset = self
            .tokens
            .get(self.pos)
            .map(|s| s.start)
            .unwrap_or(self.source.len());
        let (line, column) = line_col(self.source, offset);
        Error::Syntax {
            line,
            column,
            message: message.into(),
        }
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).map(|s| s.token.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, want: &Token) -> Result<()> {
        match self.peek() {
            Some(tok) if tok == want => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(self.error_here(format!("expected {want:?}"))),
        }
    }

    fn expect_identifier(&mut self) -> Result<String> {
        match self.advance() {
            Some(Token::Identifier(name)) => Ok(name),
            _ => Err(self.error_here("expected identifier")),
        }
    }
}

fn parse_stmt(c: &mut Cursor) -> Result<Stmt> {
    match c.peek() {
        Some(Token::Define) | Some(Token::Alias) => parse_alias(c),
        Some(Token::Forward) => parse_forward(c),
        Some(Token::Type) => parse_composite(c),
        Some(Token::Enum) => parse_enum(c),
        Some(Token::Interface) => parse_interface(c),
        _ => Err(c.error_here("expected a statement (define/alias, forward, type, enum, interface)")),
    }
}

fn parse_alias(c: &mut Cursor) -> Result<Stmt> {
    c.advance(); // `define` or `alias`
    let name = c.expect_identifier()?;
    c.expect(&Token::As)?;
    let base = parse_type_ref(c)?;
    Ok(Stmt::Alias { name, base })
}

fn parse_forward(c: &mut Cursor) -> Result<Stmt> {
    c.expect(&Token::Forward)?;
    let name = c.expect_identifier()?;
    Ok(Stmt::Forward { name })
}

fn parse_type_ref(c: &mut Cursor) -> Result<TypeRef> {
    let base = c.expect_identifier()?;
    if matches!(c.peek(), Some(Token::LBracket)) {
        c.advance();
        c.expect(&Token::RBracket)?;
        Ok(TypeRef::Array(base))
    } else {
        Ok(TypeRef::Named(base))
    }
}

fn parse_field(c: &mut Cursor) -> Result<FieldAst> {
    let name = c.expect_identifier()?;
    let type_ref = if matches!(c.peek(), Some(Token::Colon)) {
        c.advance();
        Some(parse_type_ref(c)?)
    } else {
        None
    };
    Ok(FieldAst { name, type_ref })
}

/// Parses a comma-and/or-newline-separated field list up to (excluding)
/// `terminator`. A trailing comma before `terminator` is tolerated.
fn parse_field_list(c: &mut Cursor, terminator: &Token) -> Result<Vec<FieldAst>> {
    let mut fields = Vec::new();
    loop {
        if c.peek() == Some(terminator) {
            break;
        }
        fields.push(parse_field(c)?);
        if matches!(c.peek(), Some(Token::Comma)) {
            c.advance();
        }
    }
    Ok(fields)
}

fn parse_variant(c: &mut Cursor) -> Result<VariantAst> {
    let name = c.expect_identifier()?;
    let payload = if matches!(c.peek(), Some(Token::LParen)) {
        c.advance();
        let fields = parse_field_list(c, &Token::RParen)?;
        c.expect(&Token::RParen)?;
        Some(fields)
    } else {
        None
    };
    Ok(VariantAst { name, payload })
}

fn parse_variant_list(c: &mut Cursor, terminator: &Token) -> Result<Vec<VariantAst>> {
    let mut variants = Vec::new();
    loop {
        if c.peek() == Some(terminator) {
            break;
        }
        variants.push(parse_variant(c)?);
        if matches!(c.peek(), Some(Token::Comma)) {
            c.advance();
        }
    }
    Ok(variants)
}

fn parse_composite(c: &mut Cursor) -> Result<Stmt> {
    c.expect(&Token::Type)?;
    let name = c.expect_identifier()?;
    c.expect(&Token::LBrace)?;
    let fields = parse_field_list(c, &Token::RBrace)?;
    c.expect(&Token::RBrace)?;
    Ok(Stmt::Composite { name, fields })
}

fn parse_enum(c: &mut Cursor) -> Result<Stmt> {
    c.expect(&Token::Enum)?;
    let name = c.expect_identifier()?;
    c.expect(&Token::LBrace)?;
    let variants = parse_variant_list(c, &Token::RBrace)?;
    c.expect(&Token::RBrace)?;
    Ok(Stmt::Enum { name, variants })
}

fn parse_interface(c: &mut Cursor) -> Result<Stmt> {
    c.expect(&Token::Interface)?;
    let name = c.expect_identifier()?;
    c.expect(&Token::LBrace)?;
    let fields = parse_field_list(c, &Token::RBrace)?;
    c.expect(&Token::RBrace)?;
    Ok(Stmt::Interface { name, fields })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_alias_both_spellings() {
        let p = TypeParser::new();
        let a = p.parse_program("alias uuid as uint128").unwrap();
        let b = p.parse_program("define uuid as uint128").unwrap();
        assert!(matches!(&a[0], Stmt::Alias { name, base: TypeRef::Named(base) }
            if name == "uuid" && base == "uint128"));
        assert!(matches!(&b[0], Stmt::Alias { name, base: TypeRef::Named(base) }
            if name == "uuid" && base == "uint128"));
    }

    #[test]
    fn parses_array_alias() {
        let p = TypeParser::new();
        let stmts = p.parse_program("alias name as character[]").unwrap();
        assert!(matches!(&stmts[0], Stmt::Alias { base: TypeRef::Array(elem), .. } if elem == "character"));
    }

    #[test]
    fn parses_composite_with_mixed_separators() {
        let p = TypeParser::new();
        let stmts = p
            .parse_program(
                "type Person {\n    id: uuid,\n    name\n    age\n}",
            )
            .unwrap();
        match &stmts[0] {
            Stmt::Composite { name, fields } => {
                assert_eq!(name, "Person");
                assert_eq!(fields.len(), 3);
                assert_eq!(fields[1].name, "name");
                assert!(fields[1].type_ref.is_none());
            }
            _ => panic!("expected composite"),
        }
    }

    #[test]
    fn parses_empty_composite() {
        let p = TypeParser::new();
        let stmts = p.parse_program("type Empty { }").unwrap();
        assert!(matches!(&stmts[0], Stmt::Composite { fields, .. } if fields.is_empty()));
    }

    #[test]
    fn parses_enum_with_payload_variant() {
        let p = TypeParser::new();
        let stmts = p
            .parse_program("enum Shape { circle(radius: float64), empty }")
            .unwrap();
        match &stmts[0] {
            Stmt::Enum { variants, .. } => {
                assert_eq!(variants.len(), 2);
                assert!(variants[0].payload.is_some());
                assert!(variants[1].payload.is_none());
            }
            _ => panic!("expected enum"),
        }
    }

    #[test]
    fn reports_line_and_column_on_syntax_error() {
        let p = TypeParser::new();
        let err = p.parse_program("type Foo {\n  bad::field\n}").unwrap_err();
        assert!(matches!(err, Error::Syntax { line: 2, .. }));
    }
}
