//! Recursive-descent parser with explicit operator precedence (spec §4.F).

use crate::error::{Error, Result};
use crate::expr::ast::{Ast, BinOp, Expr, LValue, Statement, UnOp};
use crate::expr::lexer::{tokenize, Token, TokenKind};

struct Cursor<'a> {
    tokens: &'a [Token],
    pos: usize,
    source_len: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|t| t.offset)
            .unwrap_or(self.source_len)
    }

    fn advance(&mut self) -> Option<&TokenKind> {
        let tok = self.tokens.get(self.pos).map(|t| &t.kind);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<()> {
        if self.eat(&kind) {
            Ok(())
        } else {
            Err(Error::Parse {
                offset: self.offset(),
                message: format!("expected {what}"),
            })
        }
    }

    fn err(&self, message: impl Into<String>) -> Error {
        Error::Parse {
            offset: self.offset(),
            message: message.into(),
        }
    }
}

/// Parse `source` into an [`Ast`]. Syntax errors carry the byte offset of
/// the offending token.
pub fn parse(source: &str) -> Result<Ast> {
    let tokens = tokenize(source)?;
    let mut cur = Cursor {
        tokens: &tokens,
        pos: 0,
        source_len: source.len(),
    };
    let mut statements = Vec::new();
    loop {
        if cur.peek().is_none() {
            break;
        }
        statements.push(parse_statement(&mut cur)?);
        if !cur.eat(&TokenKind::Semicolon) {
            break;
        }
    }
    if cur.peek().is_some() {
        return Err(cur.err("unexpected trailing input"));
    }
    if statements.is_empty() {
        return Err(Error::Parse {
            offset: 0,
            message: "expression has no statements".into(),
        });
    }
    Ok(Ast { statements })
}

fn parse_statement(cur: &mut Cursor) -> Result<Statement> {
    let lhs = parse_lvalue(cur)?;
    cur.expect(TokenKind::Assign, "'='")?;
    let rhs = parse_ternary(cur)?;
    Ok(Statement { lhs, rhs })
}

fn parse_lvalue(cur: &mut Cursor) -> Result<LValue> {
    let name = match cur.advance() {
        Some(TokenKind::Ident(s)) => s.clone(),
        _ => return Err(cur.err("expected an assignment target")),
    };
    if name == "t_y" {
        let mut history = None;
        if cur.eat(&TokenKind::LBrace) {
            cur.expect(TokenKind::Minus, "'-' in history offset")?;
            let k = parse_int_literal(cur)?;
            cur.expect(TokenKind::RBrace, "'}'")?;
            history = Some(-k);
        }
        return Ok(LValue::OutputTime { history });
    }
    if name != "y" {
        return Ok(LValue::UserVar(name));
    }

    let mut history = None;
    if cur.eat(&TokenKind::LBrace) {
        cur.expect(TokenKind::Minus, "'-' in history offset")?;
        let k = parse_int_literal(cur)?;
        cur.expect(TokenKind::RBrace, "'}'")?;
        history = Some(-k);
    }

    let mut slice = None;
    if cur.eat(&TokenKind::LBracket) {
        let from = parse_int_literal(cur)? as usize;
        cur.expect(TokenKind::Colon, "':' in slice")?;
        let to = parse_int_literal(cur)? as usize;
        cur.expect(TokenKind::RBracket, "']'")?;
        slice = Some((from, to));
    }

    Ok(LValue::Output { history, slice })
}

fn parse_int_literal(cur: &mut Cursor) -> Result<i64> {
    match cur.advance() {
        Some(TokenKind::Number(n)) => Ok(*n as i64),
        _ => Err(cur.err("expected an integer literal")),
    }
}

fn parse_ternary(cur: &mut Cursor) -> Result<Expr> {
    let cond = parse_or(cur)?;
    if cur.eat(&TokenKind::Question) {
        if cur.eat(&TokenKind::Colon) {
            let else_branch = parse_ternary(cur)?;
            return Ok(Expr::ShortTernary(Box::new(cond), Box::new(else_branch)));
        }
        let then_branch = parse_ternary(cur)?;
        cur.expect(TokenKind::Colon, "':' in ternary")?;
        let else_branch = parse_ternary(cur)?;
        return Ok(Expr::Ternary(
            Box::new(cond),
            Box::new(then_branch),
            Box::new(else_branch),
        ));
    }
    Ok(cond)
}

macro_rules! left_assoc {
    ($name:ident, $next:ident, $( $tok:pat => $op:expr ),+ $(,)?) => {
        fn $name(cur: &mut Cursor) -> Result<Expr> {
            let mut lhs = $next(cur)?;
            loop {
                let op = match cur.peek() {
                    $( Some($tok) => $op, )+
                    _ => break,
                };
                cur.advance();
                let rhs = $next(cur)?;
                lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
            }
            Ok(lhs)
        }
    };
}

left_assoc!(parse_or, parse_and, TokenKind::OrOr => BinOp::Or);
left_assoc!(parse_and, parse_equality, TokenKind::AndAnd => BinOp::And);
left_assoc!(parse_equality, parse_relational,
    TokenKind::Eq => BinOp::Eq, TokenKind::Ne => BinOp::Ne);
left_assoc!(parse_relational, parse_additive,
    TokenKind::Lt => BinOp::Lt, TokenKind::Le => BinOp::Le,
    TokenKind::Gt => BinOp::Gt, TokenKind::Ge => BinOp::Ge);
left_assoc!(parse_additive, parse_multiplicative,
    TokenKind::Plus => BinOp::Add, TokenKind::Minus => BinOp::Sub);
left_assoc!(parse_multiplicative, parse_power,
    TokenKind::Star => BinOp::Mul, TokenKind::Slash => BinOp::Div,
    TokenKind::Percent => BinOp::Mod);

fn parse_power(cur: &mut Cursor) -> Result<Expr> {
    let base = parse_unary(cur)?;
    if cur.eat(&TokenKind::Caret) {
        let exp = parse_power(cur)?;
        return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exp)));
    }
    Ok(base)
}

fn parse_unary(cur: &mut Cursor) -> Result<Expr> {
    if cur.eat(&TokenKind::Minus) {
        return Ok(Expr::Unary(UnOp::Neg, Box::new(parse_unary(cur)?)));
    }
    if cur.eat(&TokenKind::Not) {
        return Ok(Expr::Unary(UnOp::Not, Box::new(parse_unary(cur)?)));
    }
    parse_primary(cur)
}

fn parse_primary(cur: &mut Cursor) -> Result<Expr> {
    match cur.peek().cloned() {
        Some(TokenKind::Number(n)) => {
            cur.advance();
            Ok(Expr::Number(n))
        }
        Some(TokenKind::LParen) => {
            cur.advance();
            let inner = parse_ternary(cur)?;
            cur.expect(TokenKind::RParen, "')'")?;
            Ok(inner)
        }
        Some(TokenKind::LBracket) => {
            cur.advance();
            let mut elems = Vec::new();
            if !cur.eat(&TokenKind::RBracket) {
                loop {
                    elems.push(parse_ternary(cur)?);
                    if !cur.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                cur.expect(TokenKind::RBracket, "']'")?;
            }
            Ok(Expr::Vector(elems))
        }
        Some(TokenKind::Ident(name)) => {
            cur.advance();
            if name.starts_with("t_") {
                let source = name.trim_start_matches("t_").to_string();
                let mut history = None;
                if cur.eat(&TokenKind::LBrace) {
                    cur.expect(TokenKind::Minus, "'-' in history offset")?;
                    let k = parse_int_literal(cur)?;
                    cur.expect(TokenKind::RBrace, "'}'")?;
                    history = Some(-k);
                }
                return Ok(Expr::TimeOf { name: source, history });
            }
            if cur.peek() == Some(&TokenKind::LParen) {
                cur.advance();
                let mut args = Vec::new();
                if !cur.eat(&TokenKind::RParen) {
                    loop {
                        args.push(parse_ternary(cur)?);
                        if !cur.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                    cur.expect(TokenKind::RParen, "')'")?;
                }
                return Ok(Expr::Call(name, args));
            }

            let mut history = None;
            if cur.eat(&TokenKind::LBrace) {
                cur.expect(TokenKind::Minus, "'-' in history offset")?;
                let k = parse_int_literal(cur)?;
                cur.expect(TokenKind::RBrace, "'}'")?;
                history = Some(-k);
            }

            let mut slice = None;
            if cur.eat(&TokenKind::LBracket) {
                let from = parse_ternary(cur)?;
                cur.expect(TokenKind::Colon, "':' in slice")?;
                let to = parse_ternary(cur)?;
                cur.expect(TokenKind::RBracket, "']'")?;
                slice = Some((Box::new(from), Box::new(to)));
            }

            Ok(Expr::Var {
                name,
                history,
                slice,
            })
        }
        _ => Err(cur.err("expected a value")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_assignment() {
        let ast = parse("y=x+1").unwrap();
        assert_eq!(ast.statements.len(), 1);
        assert!(matches!(ast.statements[0].lhs, LValue::Output { history: None, slice: None }));
    }

    #[test]
    fn parses_multiple_statements_in_order() {
        let ast = parse("y=x+y{-1}; y{-1}=100").unwrap();
        assert_eq!(ast.statements.len(), 2);
        assert!(matches!(ast.statements[1].lhs, LValue::Output { history: Some(-1), .. }));
    }

    #[test]
    fn parses_function_call_and_vector_literal() {
        let ast = parse("y=linear(x,0,100,0,1)").unwrap();
        match &ast.statements[0].rhs {
            Expr::Call(name, args) => {
                assert_eq!(name, "linear");
                assert_eq!(args.len(), 5);
            }
            other => panic!("expected call, got {other:?}"),
        }
    }

    #[test]
    fn parse_error_reports_offset() {
        let err = parse("y=x+*1").unwrap_err();
        match err {
            Error::Parse { offset, .. } => assert_eq!(offset, 4),
            other => panic!("expected parse error, got {other:?}"),
        }
    }
}
