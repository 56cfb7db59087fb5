//! Tokenizer for the C expression subset.

use std::ops::Range;

use axred_common::{ReduxError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Question,
    Colon,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    Ne,
    AndAnd,
    OrOr,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Shl,
    Shr,
    Dot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Int(i64),
    Float(f64),
    Ident(String),
    Punct(Punct),
}

/// A token and the byte range it covers in the source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Range<usize>,
}

pub fn tokenize(src: &str) -> Result<Vec<Token>> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        let start = pos;
        let kind = if c.is_ascii_digit() || (c == b'.' && peek_digit(bytes, pos + 1)) {
            let (kind, end) = lex_number(src, pos)?;
            pos = end;
            kind
        } else if c == b'_' || c.is_ascii_alphabetic() {
            while pos < bytes.len() && (bytes[pos] == b'_' || bytes[pos].is_ascii_alphanumeric()) {
                pos += 1;
            }
            TokenKind::Ident(src[start..pos].to_string())
        } else {
            let (punct, len) = lex_punct(bytes, pos).ok_or_else(|| {
                ReduxError::parse(src, format!("unexpected character `{}` at {pos}", c as char))
            })?;
            pos += len;
            TokenKind::Punct(punct)
        };
        tokens.push(Token { kind, span: start..pos });
    }

    Ok(tokens)
}

fn peek_digit(bytes: &[u8], pos: usize) -> bool {
    bytes.get(pos).is_some_and(u8::is_ascii_digit)
}

fn lex_punct(bytes: &[u8], pos: usize) -> Option<(Punct, usize)> {
    let two = bytes.get(pos..pos + 2);
    let double = match two {
        Some(b"<=") => Some(Punct::Le),
        Some(b">=") => Some(Punct::Ge),
        Some(b"==") => Some(Punct::EqEq),
        Some(b"!=") => Some(Punct::Ne),
        Some(b"&&") => Some(Punct::AndAnd),
        Some(b"||") => Some(Punct::OrOr),
        Some(b"<<") => Some(Punct::Shl),
        Some(b">>") => Some(Punct::Shr),
        _ => None,
    };
    if let Some(p) = double {
        return Some((p, 2));
    }

    let single = match bytes[pos] {
        b'(' => Punct::LParen,
        b')' => Punct::RParen,
        b'[' => Punct::LBracket,
        b']' => Punct::RBracket,
        b',' => Punct::Comma,
        b'?' => Punct::Question,
        b':' => Punct::Colon,
        b'+' => Punct::Plus,
        b'-' => Punct::Minus,
        b'*' => Punct::Star,
        b'/' => Punct::Slash,
        b'%' => Punct::Percent,
        b'!' => Punct::Bang,
        b'<' => Punct::Lt,
        b'>' => Punct::Gt,
        b'&' => Punct::Amp,
        b'|' => Punct::Pipe,
        b'^' => Punct::Caret,
        b'~' => Punct::Tilde,
        b'.' => Punct::Dot,
        _ => return None,
    };
    Some((single, 1))
}

/// Lex a decimal or hexadecimal literal with optional `f`/`u`/`l` suffixes.
fn lex_number(src: &str, start: usize) -> Result<(TokenKind, usize)> {
    let bytes = src.as_bytes();
    let mut pos = start;

    if bytes[pos] == b'0' && matches!(bytes.get(pos + 1), Some(b'x' | b'X')) {
        pos += 2;
        let digits_start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_hexdigit() {
            pos += 1;
        }
        let digits = &src[digits_start..pos];
        let value = u64::from_str_radix(digits, 16)
            .map_err(|e| ReduxError::parse(src, format!("bad hex literal: {e}")))?;
        pos = skip_int_suffix(bytes, pos);
        return Ok((TokenKind::Int(value as i64), pos));
    }

    let mut is_float = false;
    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
        pos += 1;
    }
    if pos < bytes.len() && bytes[pos] == b'.' {
        is_float = true;
        pos += 1;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
    }
    if pos < bytes.len() && matches!(bytes[pos], b'e' | b'E') {
        let mut exp = pos + 1;
        if matches!(bytes.get(exp), Some(b'+' | b'-')) {
            exp += 1;
        }
        if peek_digit(bytes, exp) {
            is_float = true;
            pos = exp;
            while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                pos += 1;
            }
        }
    }

    let literal = &src[start..pos];
    if matches!(bytes.get(pos), Some(b'f' | b'F')) {
        pos += 1;
        let value: f64 = literal
            .parse()
            .map_err(|_| ReduxError::parse(src, format!("bad float literal `{literal}`")))?;
        // single-precision literal
        return Ok((TokenKind::Float(value as f32 as f64), pos));
    }
    if is_float {
        let value: f64 = literal
            .parse()
            .map_err(|_| ReduxError::parse(src, format!("bad float literal `{literal}`")))?;
        pos = skip_long_suffix(bytes, pos);
        return Ok((TokenKind::Float(value), pos));
    }

    let value: u64 = literal
        .parse()
        .map_err(|_| ReduxError::parse(src, format!("integer literal `{literal}` out of range")))?;
    pos = skip_int_suffix(bytes, pos);
    Ok((TokenKind::Int(value as i64), pos))
}

fn skip_int_suffix(bytes: &[u8], mut pos: usize) -> usize {
    while matches!(bytes.get(pos), Some(b'u' | b'U' | b'l' | b'L')) {
        pos += 1;
    }
    pos
}

fn skip_long_suffix(bytes: &[u8], mut pos: usize) -> usize {
    if matches!(bytes.get(pos), Some(b'l' | b'L')) {
        pos += 1;
    }
    pos
}
