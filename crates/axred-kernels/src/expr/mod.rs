//! The C expression subset accepted in map, reduce and neutral text.
//!
//! Expressions are kept as text for the generated kernel source; this
//! module validates them, rewrites element accessors (see [`massage`]) and
//! evaluates them on the host device.

mod eval;
mod lexer;
mod parser;

use std::collections::BTreeSet;

use axred_common::{DType, Result};

pub use eval::{Env, IntType, Value, eval};
pub use parser::parse;

use lexer::{Punct, TokenKind, tokenize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

/// Built-in functions callable from expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Max,
    Min,
    Fmax,
    Fmin,
    Abs,
    Fabs,
    Sqrt,
    Exp,
    Log,
    Pow,
}

impl Func {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "max" => Self::Max,
            "min" => Self::Min,
            "fmax" => Self::Fmax,
            "fmin" => Self::Fmin,
            "abs" => Self::Abs,
            "fabs" => Self::Fabs,
            "sqrt" => Self::Sqrt,
            "exp" => Self::Exp,
            "log" => Self::Log,
            "pow" => Self::Pow,
            _ => return None,
        })
    }

    pub fn arity(self) -> usize {
        match self {
            Self::Max | Self::Min | Self::Fmax | Self::Fmin | Self::Pow => 2,
            Self::Abs | Self::Fabs | Self::Sqrt | Self::Exp | Self::Log => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Var(String),
    Index { name: String, index: Box<Expr> },
    Call { name: String, args: Vec<Expr> },
    Member { base: Box<Expr>, field: String },
    Cast { dtype: DType, expr: Box<Expr> },
    Unary { op: UnaryOp, expr: Box<Expr> },
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Ternary { cond: Box<Expr>, then: Box<Expr>, otherwise: Box<Expr> },
}

/// Names an expression refers to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Names {
    /// Plain identifiers.
    pub vars: BTreeSet<String>,
    /// Indexed identifiers.
    pub arrays: BTreeSet<String>,
    /// Called functions with their argument counts.
    pub calls: BTreeSet<(String, usize)>,
}

impl Expr {
    pub fn names(&self) -> Names {
        let mut names = Names::default();
        self.collect_names(&mut names);
        names
    }

    fn collect_names(&self, names: &mut Names) {
        match self {
            Self::Int(_) | Self::Float(_) => {}
            Self::Var(name) => {
                names.vars.insert(name.clone());
            }
            Self::Index { name, index } => {
                names.arrays.insert(name.clone());
                index.collect_names(names);
            }
            Self::Call { name, args } => {
                names.calls.insert((name.clone(), args.len()));
                for arg in args {
                    arg.collect_names(names);
                }
            }
            Self::Member { base, .. } => base.collect_names(names),
            Self::Cast { expr, .. } | Self::Unary { expr, .. } => expr.collect_names(names),
            Self::Binary { lhs, rhs, .. } => {
                lhs.collect_names(names);
                rhs.collect_names(names);
            }
            Self::Ternary { cond, then, otherwise } => {
                cond.collect_names(names);
                then.collect_names(names);
                otherwise.collect_names(names);
            }
        }
    }
}

/// Rewrite every `name[i]` accessor into `name[0]`.
///
/// Inside the generated loop each array name is rebound to a pointer that
/// already addresses the current element, so the loop index must not be
/// applied a second time. The rest of the text, spacing included, is kept.
pub fn massage(src: &str) -> Result<String> {
    parse(src)?;
    let tokens = tokenize(src)?;

    let mut out = String::with_capacity(src.len());
    let mut copied = 0;
    for window in tokens.windows(4) {
        let is_accessor = matches!(
            (&window[0].kind, &window[1].kind, &window[2].kind, &window[3].kind),
            (
                TokenKind::Ident(_),
                TokenKind::Punct(Punct::LBracket),
                TokenKind::Ident(idx),
                TokenKind::Punct(Punct::RBracket),
            ) if idx == "i"
        );
        if is_accessor {
            let span = &window[2].span;
            out.push_str(&src[copied..span.start]);
            out.push('0');
            copied = span.end;
        }
    }
    out.push_str(&src[copied..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn massage_rewrites_loop_index_only() {
        assert_eq!(massage("x[i]*y[i]").unwrap(), "x[0]*y[0]");
        assert_eq!(massage("x[ i ] + a").unwrap(), "x[ 0 ] + a");
        assert_eq!(massage("x[1] + x[ii]").unwrap(), "x[1] + x[ii]");
        assert_eq!(massage("i + x[i]").unwrap(), "i + x[0]");
    }

    #[test]
    fn massage_rejects_invalid_expressions() {
        assert!(massage("x[i] +").is_err());
    }

    #[test]
    fn names_split_arrays_scalars_and_calls() {
        let names = parse("a * x[0] + max(y[i], b)").unwrap().names();
        assert_eq!(names.vars.into_iter().collect::<Vec<_>>(), vec!["a", "b", "i"]);
        assert_eq!(names.arrays.into_iter().collect::<Vec<_>>(), vec!["x", "y"]);
        assert_eq!(names.calls.into_iter().collect::<Vec<_>>(), vec![("max".to_string(), 2)]);
    }

    #[test]
    fn function_table() {
        assert_eq!(Func::from_name("fmax"), Some(Func::Fmax));
        assert_eq!(Func::from_name("fma"), None);
        assert_eq!(Func::Pow.arity(), 2);
        assert_eq!(Func::Sqrt.arity(), 1);
    }
}
