//! Recursive-descent parser for the TTQ query DSL.

use super::ast::{
    AggKind, CompareOp, Expr, FromQuery, Literal, Projection, SortDirection, Stmt, StringOp,
    TypedLiteral,
};
use super::lexer::{line_col, tokenize, Spanned, Token};
use crate::error::{Error, Result};

pub struct QueryParser;

impl QueryParser {
    pub fn new() -> Self {
        QueryParser
    }

    /// Parses a single statement, ignoring anything after its closing
    /// separator.
    pub fn parse(&self, text: &str) -> Result<Stmt> {
        let stmts = self.parse_program(text)?;
        stmts
            .into_iter()
            .next()
            .ok_or_else(|| Error::Syntax {
                line: 1,
                column: 1,
                message: "expected a statement".into(),
            })
    }

    /// Parses every statement in `text`, separated by `;` or a newline.
    pub fn parse_program(&self, text: &str) -> Result<Vec<Stmt>> {
        let tokens = tokenize(text)?;
        let mut cursor = Cursor {
            tokens,
            pos: 0,
            source: text,
        };
        let mut stmts = Vec::new();
        cursor.skip_separators();
        while !cursor.at_end() {
            stmts.push(parse_stmt(&mut cursor)?);
            cursor.skip_separators();
        }
        Ok(stmts)
    }
}

impl Default for QueryParser {
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

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|s| &s.token)
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek(), Some(Token::Newline) | Some(Token::Semicolon)) {
            self.pos += 1;
        }
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

    fn expect_string(&mut self) -> Result<String> {
        match self.advance() {
            Some(Token::StringLit(s)) => Ok(s),
            _ => Err(self.error_here("expected a string literal")),
        }
    }
}

fn parse_stmt(c: &mut Cursor) -> Result<Stmt> {
    match c.peek() {
        Some(Token::Use) => parse_use(c),
        Some(Token::Type) => parse_type_def(c),
        Some(Token::Create) => parse_create(c),
        Some(Token::From) => parse_from(c).map(Stmt::From),
        Some(Token::Update) => parse_update(c),
        Some(Token::Execute) => parse_execute(c),
        Some(Token::Dump) => parse_dump(c),
        Some(Token::Import) => parse_import(c),
        _ => Err(c.error_here("expected a query statement")),
    }
}

fn parse_use(c: &mut Cursor) -> Result<Stmt> {
    c.expect(&Token::Use)?;
    let path = match c.peek() {
        Some(Token::StringLit(_)) => c.expect_string()?,
        Some(Token::Identifier(_)) => c.expect_identifier()?,
        _ => String::new(),
    };
    let temporary = if matches!(c.peek(), Some(Token::As)) {
        c.advance();
        c.expect(&Token::Temp)?;
        true
    } else {
        false
    };
    Ok(Stmt::Use { path, temporary })
}

/// Captures the raw source text of an inline `type NAME { ... }`
/// statement and hands it, unparsed, to the schema DSL.
fn parse_type_def(c: &mut Cursor) -> Result<Stmt> {
    let begin = c
        .tokens
        .get(c.pos)
        .map(|s| s.start)
        .ok_or_else(|| c.error_here("expected a type definition"))?;
    c.expect(&Token::Type)?;
    let _name = c.expect_identifier()?;
    c.expect(&Token::LBrace)?;
    let mut depth = 1usize;
    let mut end = begin;
    loop {
        match c.advance() {
            Some(Token::LBrace) => depth += 1,
            Some(Token::RBrace) => {
                depth -= 1;
                end = c.tokens[c.pos - 1].end;
                if depth == 0 {
                    break;
                }
            }
            Some(_) => {}
            None => return Err(c.error_here("unterminated type definition")),
        }
    }
    Ok(Stmt::TypeDef(c.source[begin..end].to_owned()))
}

fn parse_create(c: &mut Cursor) -> Result<Stmt> {
    c.expect(&Token::Create)?;
    let type_name = c.expect_identifier()?;
    c.expect(&Token::LParen)?;
    let mut fields = Vec::new();
    while !matches!(c.peek(), Some(Token::RParen)) {
        let name = c.expect_identifier()?;
        c.expect(&Token::Equals)?;
        let expr = parse_expr(c)?;
        fields.push((name, expr));
        if matches!(c.peek(), Some(Token::Comma)) {
            c.advance();
        }
    }
    c.expect(&Token::RParen)?;
    Ok(Stmt::Create { type_name, fields })
}

fn parse_from(c: &mut Cursor) -> Result<FromQuery> {
    c.expect(&Token::From)?;
    let type_name = c.expect_identifier()?;
    let mut query = FromQuery {
        type_name,
        ..Default::default()
    };

    if matches!(c.peek(), Some(Token::Select)) {
        c.advance();
        query.select = parse_projections(c)?;
    }
    if matches!(c.peek(), Some(Token::Where)) {
        c.advance();
        query.filter = Some(parse_expr(c)?);
    }
    if matches!(c.peek(), Some(Token::Sort)) {
        c.advance();
        c.expect(&Token::By)?;
        let expr = parse_operand(c)?;
        let dir = match c.peek() {
            Some(Token::Desc) => {
                c.advance();
                SortDirection::Desc
            }
            Some(Token::Asc) => {
                c.advance();
                SortDirection::Asc
            }
            _ => SortDirection::Asc,
        };
        query.sort = Some((expr, dir));
    }
    if matches!(c.peek(), Some(Token::Group)) {
        c.advance();
        c.expect(&Token::By)?;
        query.group = Some(parse_operand(c)?);
    }
    Ok(query)
}

fn parse_projections(c: &mut Cursor) -> Result<Vec<Projection>> {
    let mut projections = Vec::new();
    loop {
        if matches!(c.peek(), Some(Token::Star)) {
            c.advance();
            projections.push(Projection::Star);
        } else {
            let expr = parse_expr(c)?;
            let alias = if matches!(c.peek(), Some(Token::As)) {
                c.advance();
                Some(c.expect_identifier()?)
            } else {
                None
            };
            projections.push(Projection::Expr { expr, alias });
        }
        if matches!(c.peek(), Some(Token::Comma)) {
            c.advance();
        } else {
            break;
        }
    }
    Ok(projections)
}

fn parse_update(c: &mut Cursor) -> Result<Stmt> {
    c.expect(&Token::Update)?;
    let type_name = c.expect_identifier()?;
    c.expect(&Token::Set)?;
    let mut assignments = Vec::new();
    loop {
        let name = c.expect_identifier()?;
        c.expect(&Token::Equals)?;
        let expr = parse_expr(c)?;
        assignments.push((name, expr));
        if matches!(c.peek(), Some(Token::Comma)) {
            c.advance();
        } else {
            break;
        }
    }
    let filter = if matches!(c.peek(), Some(Token::Where)) {
        c.advance();
        Some(parse_expr(c)?)
    } else {
        None
    };
    Ok(Stmt::Update {
        type_name,
        assignments,
        filter,
    })
}

fn parse_execute(c: &mut Cursor) -> Result<Stmt> {
    c.expect(&Token::Execute)?;
    let file = c.expect_string()?;
    Ok(Stmt::Execute { file })
}

fn parse_dump(c: &mut Cursor) -> Result<Stmt> {
    c.expect(&Token::Dump)?;
    let type_name = c.expect_identifier()?;
    let file = if matches!(c.peek(), Some(Token::StringLit(_))) {
        Some(c.expect_string()?)
    } else {
        None
    };
    Ok(Stmt::Dump { type_name, file })
}

fn parse_import(c: &mut Cursor) -> Result<Stmt> {
    c.expect(&Token::Import)?;
    let type_name = c.expect_identifier()?;
    let file = c.expect_string()?;
    Ok(Stmt::Import { type_name, file })
}

/* EXPRESSIONS */

fn parse_expr(c: &mut Cursor) -> Result<Expr> {
    parse_or(c)
}

fn parse_or(c: &mut Cursor) -> Result<Expr> {
    let mut left = parse_and(c)?;
    while matches!(c.peek(), Some(Token::Or)) {
        c.advance();
        let right = parse_and(c)?;
        left = Expr::Or(Box::new(left), Box::new(right));
    }
    Ok(left)
}

fn parse_and(c: &mut Cursor) -> Result<Expr> {
    let mut left = parse_not(c)?;
    while matches!(c.peek(), Some(Token::And)) {
        c.advance();
        let right = parse_not(c)?;
        left = Expr::And(Box::new(left), Box::new(right));
    }
    Ok(left)
}

fn parse_not(c: &mut Cursor) -> Result<Expr> {
    if matches!(c.peek(), Some(Token::Not)) {
        c.advance();
        Ok(Expr::Not(Box::new(parse_not(c)?)))
    } else {
        parse_comparison(c)
    }
}

fn parse_comparison(c: &mut Cursor) -> Result<Expr> {
    let left = parse_operand(c)?;
    let op = match c.peek() {
        Some(Token::Equals) => Some(CompareOp::Eq),
        Some(Token::NotEquals) => Some(CompareOp::Ne),
        Some(Token::Less) => Some(CompareOp::Lt),
        Some(Token::LessEqual) => Some(CompareOp::Le),
        Some(Token::Greater) => Some(CompareOp::Gt),
        Some(Token::GreaterEqual) => Some(CompareOp::Ge),
        _ => None,
    };
    if let Some(op) = op {
        c.advance();
        let right = parse_operand(c)?;
        return Ok(Expr::Compare(Box::new(left), op, Box::new(right)));
    }
    if let Some(string_op) = peek_string_predicate(c) {
        consume_string_predicate(c, string_op)?;
        let right = parse_operand(c)?;
        return Ok(Expr::StringPredicate(Box::new(left), string_op, Box::new(right)));
    }
    Ok(left)
}

fn peek_string_predicate(c: &Cursor) -> Option<StringOp> {
    match c.peek() {
        Some(Token::Starts) => Some(StringOp::StartsWith),
        Some(Token::Ends) => Some(StringOp::EndsWith),
        Some(Token::Contains) => Some(StringOp::Contains),
        Some(Token::Matches) => Some(StringOp::Matches),
        _ => None,
    }
}

fn consume_string_predicate(c: &mut Cursor, op: StringOp) -> Result<()> {
    match op {
        StringOp::StartsWith => {
            c.expect(&Token::Starts)?;
            c.expect(&Token::With)
        }
        StringOp::EndsWith => {
            c.expect(&Token::Ends)?;
            c.expect(&Token::With)
        }
        StringOp::Contains => c.expect(&Token::Contains),
        StringOp::Matches => c.expect(&Token::Matches),
    }
}

fn parse_operand(c: &mut Cursor) -> Result<Expr> {
    match c.peek() {
        Some(Token::LParen) => {
            c.advance();
            let expr = parse_expr(c)?;
            c.expect(&Token::RParen)?;
            Ok(expr)
        }
        Some(Token::True) => {
            c.advance();
            Ok(Expr::Literal(TypedLiteral {
                literal: Literal::Bool(true),
                suffix: None,
            }))
        }
        Some(Token::False) => {
            c.advance();
            Ok(Expr::Literal(TypedLiteral {
                literal: Literal::Bool(false),
                suffix: None,
            }))
        }
        Some(Token::StringLit(_)) => {
            let s = c.expect_string()?;
            Ok(Expr::Literal(TypedLiteral {
                literal: Literal::Text(s),
                suffix: None,
            }))
        }
        Some(Token::Number(_)) => parse_number(c),
        Some(Token::Identifier(name)) => {
            let name = name.clone();
            if let Some(kind) = aggregate_kind(&name) {
                if matches!(c.peek_at(1), Some(Token::LParen)) {
                    return parse_aggregate(c, kind);
                }
            }
            parse_field_path(c)
        }
        _ => Err(c.error_here("expected an expression")),
    }
}

fn aggregate_kind(name: &str) -> Option<AggKind> {
    match name {
        "count" => Some(AggKind::Count),
        "sum" => Some(AggKind::Sum),
        "average" => Some(AggKind::Average),
        "min" => Some(AggKind::Min),
        "max" => Some(AggKind::Max),
        _ => None,
    }
}

fn parse_aggregate(c: &mut Cursor, kind: AggKind) -> Result<Expr> {
    c.advance(); // the aggregate name
    c.expect(&Token::LParen)?;
    let arg = if matches!(c.peek(), Some(Token::RParen)) {
        None
    } else {
        Some(Box::new(parse_expr(c)?))
    };
    c.expect(&Token::RParen)?;
    if kind != AggKind::Count && arg.is_none() {
        return Err(c.error_here(format!("{kind:?} requires an argument")));
    }
    Ok(Expr::Aggregate(kind, arg))
}

fn parse_field_path(c: &mut Cursor) -> Result<Expr> {
    let mut path = vec![c.expect_identifier()?];
    while matches!(c.peek(), Some(Token::Dot)) {
        c.advance();
        path.push(c.expect_identifier()?);
    }
    Ok(Expr::Field(path))
}

fn parse_number(c: &mut Cursor) -> Result<Expr> {
    let raw = match c.advance() {
        Some(Token::Number(raw)) => raw,
        _ => return Err(c.error_here("expected a number")),
    };
    let split_at = raw
        .find(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
        .unwrap_or(raw.len());
    let (numeric, suffix) = raw.split_at(split_at);
    let literal = if numeric.contains('.') {
        Literal::Float(numeric.parse().map_err(|_| c.error_here("invalid float literal"))?)
    } else {
        Literal::Int(numeric.parse().map_err(|_| c.error_here("invalid integer literal"))?)
    };
    let suffix = if suffix.is_empty() {
        None
    } else {
        Some(suffix.to_owned())
    };
    Ok(Expr::Literal(TypedLiteral { literal, suffix }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_from_with_all_clauses() {
        let p = QueryParser::new();
        let stmt = p
            .parse("from Person select name, age where age >= 18u8 sort by age desc")
            .unwrap();
        match stmt {
            Stmt::From(q) => {
                assert_eq!(q.type_name, "Person");
                assert_eq!(q.select.len(), 2);
                assert!(q.filter.is_some());
                assert!(matches!(q.sort, Some((_, SortDirection::Desc))));
            }
            _ => panic!("expected from"),
        }
    }

    #[test]
    fn parses_string_predicate() {
        let p = QueryParser::new();
        let stmt = p.parse("from Person where name starts with \"A\"").unwrap();
        match stmt {
            Stmt::From(q) => assert!(matches!(
                q.filter,
                Some(Expr::StringPredicate(_, StringOp::StartsWith, _))
            )),
            _ => panic!("expected from"),
        }
    }

    #[test]
    fn parses_aggregate_projection_with_group_by() {
        let p = QueryParser::new();
        let stmt = p
            .parse("from Person select department, count() group by department")
            .unwrap();
        match stmt {
            Stmt::From(q) => {
                assert!(q.group.is_some());
                assert!(matches!(
                    q.select[1],
                    Projection::Expr { expr: Expr::Aggregate(AggKind::Count, None), .. }
                ));
            }
            _ => panic!("expected from"),
        }
    }

    #[test]
    fn parses_program_with_mixed_separators() {
        let p = QueryParser::new();
        let stmts = p
            .parse_program("create Foo(x=1)\nfrom Foo;\nfrom Foo select *")
            .unwrap();
        assert_eq!(stmts.len(), 3);
    }

    #[test]
    fn parses_typed_number_literal_suffix() {
        let p = QueryParser::new();
        let stmt = p.parse("from Foo where x = 42u8").unwrap();
        match stmt {
            Stmt::From(q) => match q.filter {
                Some(Expr::Compare(_, CompareOp::Eq, right)) => match *right {
                    Expr::Literal(TypedLiteral { literal: Literal::Int(42), suffix: Some(s) }) => {
                        assert_eq!(s, "u8")
                    }
                    other => panic!("unexpected literal {other:?}"),
                },
                other => panic!("unexpected filter {other:?}"),
            },
            _ => panic!("expected from"),
        }
    }

    #[test]
    fn parses_inline_type_definition() {
        let p = QueryParser::new();
        let stmt = p.parse("type Point { x: int32, y: int32 }").unwrap();
        match stmt {
            Stmt::TypeDef(src) => assert!(src.contains("x: int32")),
            _ => panic!("expected type def"),
        }
    }

    #[test]
    fn parses_use_with_bare_identifier_path() {
        let p = QueryParser::new();
        let stmt = p.parse("use test_db as temp").unwrap();
        match stmt {
            Stmt::Use { path, temporary } => {
                assert_eq!(path, "test_db");
                assert!(temporary);
            }
            _ => panic!("expected use"),
        }
    }

    #[test]
    fn parses_use_without_temp_or_quotes() {
        let p = QueryParser::new();
        let stmt = p.parse("use test_db").unwrap();
        match stmt {
            Stmt::Use { path, temporary } => {
                assert_eq!(path, "test_db");
                assert!(!temporary);
            }
            _ => panic!("expected use"),
        }
    }

    #[test]
    fn parses_bare_use_as_empty_non_temp_path() {
        let p = QueryParser::new();
        let stmt = p.parse("use").unwrap();
        match stmt {
            Stmt::Use { path, temporary } => {
                assert!(path.is_empty());
                assert!(!temporary);
            }
            _ => panic!("expected use"),
        }
    }
}
