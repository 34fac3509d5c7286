//! Tokenizer for the map expression DSL, built on `winnow` combinators.

use winnow::ascii::{digit1, multispace0};
use winnow::combinator::{alt, opt};
use winnow::token::{one_of, take_while};
use winnow::{PResult, Parser};

use crate::error::{Error, Result};

/// A single lexical token with the byte offset it started at, used for
/// `ParseError` reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Offset of the first byte of this token in the source text.
    pub offset: usize,
    /// Token payload.
    pub kind: TokenKind,
}

/// Lexical token kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Not,
    AndAnd,
    OrOr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Assign,
    Question,
    Colon,
    Comma,
    Semicolon,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
}

/// Tokenize `src`, returning `ParseError` with the offending byte offset on
/// any unrecognized character.
pub fn tokenize(src: &str) -> Result<Vec<Token>> {
    let mut input = src;
    let mut tokens = Vec::new();
    loop {
        let _ = multispace0::<_, winnow::error::ContextError>.parse_next(&mut input);
        if input.is_empty() {
            break;
        }
        let offset = src.len() - input.len();
        let before = input;
        let kind = next_token(&mut input).map_err(|_| Error::Parse {
            offset,
            message: format!("unrecognized token near {:?}", &before[..before.len().min(12)]),
        })?;
        tokens.push(Token { offset, kind });
    }
    Ok(tokens)
}

fn next_token(input: &mut &str) -> PResult<TokenKind> {
    alt((number, ident, multi_char_op, single_char_op)).parse_next(input)
}

fn number(input: &mut &str) -> PResult<TokenKind> {
    let int_part = digit1(input)?;
    let frac_part: Option<(char, &str)> = opt(('.', digit1)).parse_next(input)?;
    let exp_part: Option<(char, Option<char>, &str)> =
        opt((one_of(['e', 'E']), opt(one_of(['+', '-'])), digit1)).parse_next(input)?;
    let _suffix: Option<char> = opt(one_of(['d', 'f'])).parse_next(input)?;

    let mut text = int_part.to_string();
    if let Some((dot, frac)) = frac_part {
        text.push(dot);
        text.push_str(frac);
    }
    if let Some((e, sign, digits)) = exp_part {
        text.push(e);
        if let Some(s) = sign {
            text.push(s);
        }
        text.push_str(digits);
    }
    let value: f64 = text.parse().unwrap_or(0.0);
    Ok(TokenKind::Number(value))
}

fn ident(input: &mut &str) -> PResult<TokenKind> {
    let first = take_while(1, |c: char| c.is_alphabetic() || c == '_').parse_next(input)?;
    let rest = take_while(0.., |c: char| c.is_alphanumeric() || c == '_').parse_next(input)?;
    Ok(TokenKind::Ident(format!("{first}{rest}")))
}

fn multi_char_op(input: &mut &str) -> PResult<TokenKind> {
    alt((
        "&&".value(TokenKind::AndAnd),
        "||".value(TokenKind::OrOr),
        "==".value(TokenKind::Eq),
        "!=".value(TokenKind::Ne),
        "<=".value(TokenKind::Le),
        ">=".value(TokenKind::Ge),
    ))
    .parse_next(input)
}

fn single_char_op(input: &mut &str) -> PResult<TokenKind> {
    one_of(['+', '-', '*', '/', '%', '^', '!', '<', '>', '=', '?', ':', ',', ';', '(', ')', '[', ']', '{', '}'])
        .map(|c| match c {
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '^' => TokenKind::Caret,
            '!' => TokenKind::Not,
            '<' => TokenKind::Lt,
            '>' => TokenKind::Gt,
            '=' => TokenKind::Assign,
            '?' => TokenKind::Question,
            ':' => TokenKind::Colon,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            _ => unreachable!(),
        })
        .parse_next(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_simple_assignment() {
        let toks = tokenize("y=x+1").unwrap();
        assert_eq!(
            toks.iter().map(|t| t.kind.clone()).collect::<Vec<_>>(),
            vec![
                TokenKind::Ident("y".into()),
                TokenKind::Assign,
                TokenKind::Ident("x".into()),
                TokenKind::Plus,
                TokenKind::Number(1.0),
            ]
        );
    }

    #[test]
    fn tokenizes_history_and_braces() {
        let toks = tokenize("y{-1}=100").unwrap();
        assert!(matches!(toks[1].kind, TokenKind::LBrace));
        assert!(matches!(toks[2].kind, TokenKind::Minus));
    }

    #[test]
    fn rejects_unknown_character() {
        assert!(tokenize("y=x@1").is_err());
    }
}
