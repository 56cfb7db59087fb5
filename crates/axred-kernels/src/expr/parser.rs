//! Recursive-descent parser producing [`Expr`] trees.
//!
//! Precedence follows C, loosest first: `?:`, `||`, `&&`, `|`, `^`, `&`,
//! `== !=`, `< <= > >=`, `<< >>`, `+ -`, `* / %`, unary and casts, postfix
//! `[]` and `.field`.
//!
//! Parsing is purely syntactic. Calls to unknown functions are accepted
//! because a preamble may define them; the host evaluator rejects them.

use axred_common::{DType, ReduxError, Result};

use super::lexer::{Punct, Token, TokenKind, tokenize};
use super::{BinaryOp, Expr, UnaryOp};

/// Words that may start a cast's type name.
const TYPE_WORDS: &[&str] = &[
    "char", "uchar", "short", "ushort", "int", "uint", "long", "ulong", "float", "double",
    "signed", "unsigned",
];

pub fn parse(src: &str) -> Result<Expr> {
    let tokens = tokenize(src)?;
    let mut parser = Parser { src, tokens: &tokens, pos: 0 };
    let expr = parser.ternary()?;
    if let Some(tok) = parser.peek() {
        return Err(parser.error(format!("unexpected trailing token at {}", tok.span.start)));
    }
    Ok(expr)
}

type Level = &'static [(Punct, BinaryOp)];

const OR: Level = &[(Punct::OrOr, BinaryOp::Or)];
const AND: Level = &[(Punct::AndAnd, BinaryOp::And)];
const BIT_OR: Level = &[(Punct::Pipe, BinaryOp::BitOr)];
const BIT_XOR: Level = &[(Punct::Caret, BinaryOp::BitXor)];
const BIT_AND: Level = &[(Punct::Amp, BinaryOp::BitAnd)];
const EQUALITY: Level = &[(Punct::EqEq, BinaryOp::Eq), (Punct::Ne, BinaryOp::Ne)];
const RELATIONAL: Level = &[
    (Punct::Lt, BinaryOp::Lt),
    (Punct::Le, BinaryOp::Le),
    (Punct::Gt, BinaryOp::Gt),
    (Punct::Ge, BinaryOp::Ge),
];
const SHIFT: Level = &[(Punct::Shl, BinaryOp::Shl), (Punct::Shr, BinaryOp::Shr)];
const ADDITIVE: Level = &[(Punct::Plus, BinaryOp::Add), (Punct::Minus, BinaryOp::Sub)];
const MULTIPLICATIVE: Level = &[
    (Punct::Star, BinaryOp::Mul),
    (Punct::Slash, BinaryOp::Div),
    (Punct::Percent, BinaryOp::Rem),
];

/// Binary levels from loosest to tightest.
const LEVELS: &[Level] =
    &[OR, AND, BIT_OR, BIT_XOR, BIT_AND, EQUALITY, RELATIONAL, SHIFT, ADDITIVE, MULTIPLICATIVE];

struct Parser<'a> {
    src: &'a str,
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&'a Token> {
        self.tokens.get(self.pos + offset)
    }

    fn bump(&mut self) -> Option<&'a Token> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn error(&self, reason: impl Into<String>) -> ReduxError {
        ReduxError::parse(self.src, reason)
    }

    fn eat(&mut self, punct: Punct) -> bool {
        match self.peek() {
            Some(Token { kind: TokenKind::Punct(p), .. }) if *p == punct => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn expect(&mut self, punct: Punct) -> Result<()> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(self.error(format!("expected {punct:?}")))
        }
    }

    fn ternary(&mut self) -> Result<Expr> {
        let cond = self.binary(0)?;
        if !self.eat(Punct::Question) {
            return Ok(cond);
        }
        let then = self.ternary()?;
        self.expect(Punct::Colon)?;
        let otherwise = self.ternary()?;
        Ok(Expr::Ternary {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    /// Left-associative chain of the operators at `LEVELS[level]`.
    fn binary(&mut self, level: usize) -> Result<Expr> {
        let Some(ops) = LEVELS.get(level) else {
            return self.unary();
        };
        let mut lhs = self.binary(level + 1)?;
        'outer: loop {
            for (punct, op) in ops.iter() {
                if self.eat(*punct) {
                    let rhs = self.binary(level + 1)?;
                    lhs = Expr::Binary { op: *op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
                    continue 'outer;
                }
            }
            return Ok(lhs);
        }
    }

    fn unary(&mut self) -> Result<Expr> {
        let op = if self.eat(Punct::Minus) {
            Some(UnaryOp::Neg)
        } else if self.eat(Punct::Plus) {
            Some(UnaryOp::Plus)
        } else if self.eat(Punct::Bang) {
            Some(UnaryOp::Not)
        } else if self.eat(Punct::Tilde) {
            Some(UnaryOp::BitNot)
        } else {
            None
        };
        if let Some(op) = op {
            let expr = self.unary()?;
            return Ok(Expr::Unary { op, expr: Box::new(expr) });
        }

        if let Some(dtype) = self.cast_type()? {
            let expr = self.unary()?;
            return Ok(Expr::Cast { dtype, expr: Box::new(expr) });
        }

        self.postfix()
    }

    /// Parse `( type-name )` if the tokens at the cursor form a cast.
    fn cast_type(&mut self) -> Result<Option<DType>> {
        let starts_cast = matches!(
            (self.peek(), self.peek_at(1)),
            (
                Some(Token { kind: TokenKind::Punct(Punct::LParen), .. }),
                Some(Token { kind: TokenKind::Ident(word), .. }),
            ) if TYPE_WORDS.contains(&word.as_str())
        );
        if !starts_cast {
            return Ok(None);
        }

        self.pos += 1;
        let mut words = Vec::new();
        while let Some(Token { kind: TokenKind::Ident(word), .. }) = self.peek() {
            words.push(word.as_str());
            self.pos += 1;
        }
        self.expect(Punct::RParen)?;

        let name = words.join(" ");
        DType::from_c_name(&name)
            .map(Some)
            .ok_or_else(|| self.error(format!("unknown cast type `{name}`")))
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(Punct::LBracket) {
                let Expr::Var(name) = expr else {
                    return Err(self.error("only named arrays can be indexed"));
                };
                let index = self.ternary()?;
                self.expect(Punct::RBracket)?;
                expr = Expr::Index { name, index: Box::new(index) };
            } else if self.eat(Punct::Dot) {
                let Some(Token { kind: TokenKind::Ident(field), .. }) = self.bump() else {
                    return Err(self.error("expected a field name after `.`"));
                };
                expr = Expr::Member { base: Box::new(expr), field: field.clone() };
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        let Some(tok) = self.bump() else {
            return Err(self.error("unexpected end of expression"));
        };
        match &tok.kind {
            TokenKind::Int(v) => Ok(Expr::Int(*v)),
            TokenKind::Float(v) => Ok(Expr::Float(*v)),
            TokenKind::Punct(Punct::LParen) => {
                let inner = self.ternary()?;
                self.expect(Punct::RParen)?;
                Ok(inner)
            }
            TokenKind::Ident(name) => {
                if self.eat(Punct::LParen) {
                    let args = self.call_args()?;
                    return Ok(Expr::Call { name: name.clone(), args });
                }
                Ok(match name.as_str() {
                    "INFINITY" | "infinity" => Expr::Float(f64::INFINITY),
                    "NAN" => Expr::Float(f64::NAN),
                    _ => Expr::Var(name.clone()),
                })
            }
            TokenKind::Punct(p) => {
                Err(self.error(format!("unexpected {p:?} at {}", tok.span.start)))
            }
        }
    }

    fn call_args(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.eat(Punct::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.ternary()?);
            if self.eat(Punct::RParen) {
                return Ok(args);
            }
            self.expect(Punct::Comma)?;
        }
    }
}
