//! Host evaluation of parsed expressions with C arithmetic rules.

use axred_common::{DType, ReduxError, Result, ScalarValue};

use super::{BinaryOp, Expr, Func, UnaryOp};

/// C integer types an integer rvalue can have after integer promotion,
/// ordered so that the usual arithmetic conversions pick the larger one
/// (`int` is 32 bits, `long` is 64 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IntType {
    Int,
    UInt,
    Long,
    ULong,
}

impl IntType {
    /// Type of an element of `dtype` once promoted, `None` for non-integers.
    pub fn promoted(dtype: DType) -> Option<Self> {
        Some(match dtype {
            DType::I8 | DType::U8 | DType::I16 | DType::U16 | DType::I32 => Self::Int,
            DType::U32 => Self::UInt,
            DType::I64 => Self::Long,
            DType::U64 => Self::ULong,
            _ => return None,
        })
    }

    pub fn is_unsigned(self) -> bool {
        matches!(self, Self::UInt | Self::ULong)
    }

    pub fn bits(self) -> u32 {
        match self {
            Self::Int | Self::UInt => 32,
            Self::Long | Self::ULong => 64,
        }
    }

    /// `value` reduced modulo 2^bits into the range of this type.
    pub fn wrap(self, value: i128) -> i128 {
        match self {
            Self::Int => value as i32 as i128,
            Self::UInt => value as u32 as i128,
            Self::Long => value as i64 as i128,
            Self::ULong => value as u64 as i128,
        }
    }
}

/// A C rvalue. Integers keep their promoted type so unsigned arithmetic
/// wraps and compares the way the device does; every real type widens to
/// `Float`. Narrower types are recovered with [`Value::cast`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// `value` always lies in the range of `ty`.
    Int { value: i128, ty: IntType },
    Float(f64),
}

impl Value {
    /// An `int`.
    pub const fn int(value: i32) -> Self {
        Self::Int { value: value as i128, ty: IntType::Int }
    }

    /// An `unsigned int`.
    pub const fn uint(value: u32) -> Self {
        Self::Int { value: value as i128, ty: IntType::UInt }
    }

    /// `value` converted to `ty`.
    pub fn typed(value: i128, ty: IntType) -> Self {
        Self::Int { value: ty.wrap(value), ty }
    }

    /// An integer literal: `int` when it fits, else `long`.
    pub fn literal(value: i64) -> Self {
        match i32::try_from(value) {
            Ok(v) => Self::int(v),
            Err(_) => Self::Int { value: value as i128, ty: IntType::Long },
        }
    }

    pub fn from_scalar(scalar: ScalarValue) -> Self {
        match IntType::promoted(scalar.dtype()) {
            Some(ty) => Self::typed(scalar.as_i128(), ty),
            None => Self::Float(scalar.as_f64()),
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int { value, .. } => value as f64,
            Self::Float(v) => v,
        }
    }

    pub fn truthy(self) -> bool {
        match self {
            Self::Int { value, .. } => value != 0,
            Self::Float(v) => v != 0.0,
        }
    }

    /// Scalar of type `dtype` holding this value after a C conversion.
    pub fn to_scalar(self, dtype: DType) -> Result<ScalarValue> {
        let widened = match self {
            Self::Int { value, ty: IntType::ULong } => ScalarValue::U64(value as u64),
            Self::Int { value, .. } => ScalarValue::I64(value as i64),
            Self::Float(v) => ScalarValue::F64(v),
        };
        widened
            .cast(dtype)
            .ok_or_else(|| eval_error(format!("no scalar conversion to {dtype}")))
    }

    /// Value after a C cast to `dtype`.
    pub fn cast(self, dtype: DType) -> Result<Self> {
        self.to_scalar(dtype).map(Self::from_scalar)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::int(i32::from(b))
    }
}

/// Variable bindings visible to an expression.
pub trait Env {
    /// Value of a plain identifier, `None` when unbound.
    fn var(&self, name: &str) -> Option<Value>;

    /// Element `index` of array `name`, relative to its current position.
    fn element(&self, name: &str, index: i64) -> Result<Value>;
}

fn eval_error(reason: impl Into<String>) -> ReduxError {
    ReduxError::device(format!("expression evaluation failed: {}", reason.into()))
}

pub fn eval(expr: &Expr, env: &dyn Env) -> Result<Value> {
    match expr {
        Expr::Int(v) => Ok(Value::literal(*v)),
        Expr::Float(v) => Ok(Value::Float(*v)),
        Expr::Var(name) => {
            env.var(name).ok_or_else(|| eval_error(format!("`{name}` is undeclared")))
        }
        Expr::Index { name, index } => match eval(index, env)? {
            Value::Int { value, .. } => {
                let index = i64::try_from(value)
                    .map_err(|_| eval_error(format!("index {value} into `{name}` is out of range")))?;
                env.element(name, index)
            }
            Value::Float(_) => Err(eval_error(format!("index into `{name}` is not an integer"))),
        },
        Expr::Call { name, args } => {
            let func = Func::from_name(name)
                .ok_or_else(|| eval_error(format!("unknown function `{name}`")))?;
            if args.len() != func.arity() {
                return Err(eval_error(format!(
                    "`{name}` takes {} argument(s), got {}",
                    func.arity(),
                    args.len()
                )));
            }
            let values = args.iter().map(|a| eval(a, env)).collect::<Result<Vec<_>>>()?;
            call(func, &values)
        }
        Expr::Member { field, .. } => {
            Err(eval_error(format!("member access `.{field}` needs vector types")))
        }
        Expr::Cast { dtype, expr } => eval(expr, env)?.cast(*dtype),
        Expr::Unary { op, expr } => {
            let v = eval(expr, env)?;
            Ok(match (op, v) {
                (UnaryOp::Plus, v) => v,
                (UnaryOp::Neg, Value::Int { value, ty }) => Value::typed(-value, ty),
                (UnaryOp::Neg, Value::Float(f)) => Value::Float(-f),
                (UnaryOp::Not, v) => Value::from(!v.truthy()),
                (UnaryOp::BitNot, Value::Int { value, ty }) => Value::typed(!value, ty),
                (UnaryOp::BitNot, Value::Float(_)) => {
                    return Err(eval_error("`~` needs an integer operand"));
                }
            })
        }
        Expr::Binary { op: BinaryOp::And, lhs, rhs } => {
            Ok(Value::from(eval(lhs, env)?.truthy() && eval(rhs, env)?.truthy()))
        }
        Expr::Binary { op: BinaryOp::Or, lhs, rhs } => {
            Ok(Value::from(eval(lhs, env)?.truthy() || eval(rhs, env)?.truthy()))
        }
        Expr::Binary { op, lhs, rhs } => binary(*op, eval(lhs, env)?, eval(rhs, env)?),
        Expr::Ternary { cond, then, otherwise } => {
            if eval(cond, env)?.truthy() {
                eval(then, env)
            } else {
                eval(otherwise, env)
            }
        }
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value> {
    if let (Value::Int { value: a, ty: ta }, Value::Int { value: b, ty: tb }) = (lhs, rhs) {
        return int_binary(op, (a, ta), (b, tb));
    }
    let (a, b) = (lhs.as_f64(), rhs.as_f64());
    Ok(match op {
        BinaryOp::Add => Value::Float(a + b),
        BinaryOp::Sub => Value::Float(a - b),
        BinaryOp::Mul => Value::Float(a * b),
        BinaryOp::Div => Value::Float(a / b),
        BinaryOp::Rem => return Err(eval_error("`%` needs integer operands")),
        BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::Shl | BinaryOp::Shr => {
            return Err(eval_error(format!("{op:?} needs integer operands")));
        }
        BinaryOp::Lt => Value::from(a < b),
        BinaryOp::Le => Value::from(a <= b),
        BinaryOp::Gt => Value::from(a > b),
        BinaryOp::Ge => Value::from(a >= b),
        BinaryOp::Eq => Value::from(a == b),
        BinaryOp::Ne => Value::from(a != b),
        BinaryOp::And => Value::from(a != 0.0 && b != 0.0),
        BinaryOp::Or => Value::from(a != 0.0 || b != 0.0),
    })
}

/// Integer operation after the usual arithmetic conversions. Shifts keep
/// the left operand's type and mask the count to its width.
fn int_binary(op: BinaryOp, (lhs, ta): (i128, IntType), (rhs, tb): (i128, IntType)) -> Result<Value> {
    let count = (rhs as u32) & (ta.bits() - 1);
    let ty = ta.max(tb);
    let (a, b) = (ty.wrap(lhs), ty.wrap(rhs));
    let arith = |v: i128| Value::typed(v, ty);
    Ok(match op {
        BinaryOp::Add => arith(a + b),
        BinaryOp::Sub => arith(a - b),
        BinaryOp::Mul => arith(a.wrapping_mul(b)),
        BinaryOp::Div => {
            if b == 0 {
                return Err(eval_error("integer division by zero"));
            }
            arith(a / b)
        }
        BinaryOp::Rem => {
            if b == 0 {
                return Err(eval_error("integer division by zero"));
            }
            arith(a % b)
        }
        BinaryOp::Lt => Value::from(a < b),
        BinaryOp::Le => Value::from(a <= b),
        BinaryOp::Gt => Value::from(a > b),
        BinaryOp::Ge => Value::from(a >= b),
        BinaryOp::Eq => Value::from(a == b),
        BinaryOp::Ne => Value::from(a != b),
        BinaryOp::And => Value::from(a != 0 && b != 0),
        BinaryOp::Or => Value::from(a != 0 || b != 0),
        BinaryOp::BitAnd => arith(a & b),
        BinaryOp::BitOr => arith(a | b),
        BinaryOp::BitXor => arith(a ^ b),
        BinaryOp::Shl => Value::typed(lhs << count, ta),
        BinaryOp::Shr => Value::typed(lhs >> count, ta),
    })
}

fn call(func: Func, args: &[Value]) -> Result<Value> {
    let arg = |i: usize| {
        args.get(i).copied().ok_or_else(|| eval_error(format!("{func:?} is missing argument {i}")))
    };
    Ok(match func {
        Func::Max | Func::Min => match (arg(0)?, arg(1)?) {
            (Value::Int { value: a, ty: ta }, Value::Int { value: b, ty: tb }) => {
                let ty = ta.max(tb);
                let (a, b) = (ty.wrap(a), ty.wrap(b));
                Value::typed(if func == Func::Max { a.max(b) } else { a.min(b) }, ty)
            }
            (a, b) => {
                let (a, b) = (a.as_f64(), b.as_f64());
                Value::Float(if func == Func::Max { a.max(b) } else { a.min(b) })
            }
        },
        Func::Fmax => Value::Float(arg(0)?.as_f64().max(arg(1)?.as_f64())),
        Func::Fmin => Value::Float(arg(0)?.as_f64().min(arg(1)?.as_f64())),
        Func::Abs => match arg(0)? {
            Value::Int { value, ty } => Value::typed(value.abs(), ty),
            Value::Float(v) => Value::Float(v.abs()),
        },
        Func::Fabs => Value::Float(arg(0)?.as_f64().abs()),
        Func::Sqrt => Value::Float(arg(0)?.as_f64().sqrt()),
        Func::Exp => Value::Float(arg(0)?.as_f64().exp()),
        Func::Log => Value::Float(arg(0)?.as_f64().ln()),
        Func::Pow => Value::Float(arg(0)?.as_f64().powf(arg(1)?.as_f64())),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::expr::parse;

    struct MapEnv {
        vars: HashMap<&'static str, Value>,
        arrays: HashMap<&'static str, Vec<Value>>,
    }

    impl Env for MapEnv {
        fn var(&self, name: &str) -> Option<Value> {
            self.vars.get(name).copied()
        }

        fn element(&self, name: &str, index: i64) -> Result<Value> {
            self.arrays
                .get(name)
                .and_then(|a| a.get(index as usize))
                .copied()
                .ok_or_else(|| eval_error("out of bounds"))
        }
    }

    fn env() -> MapEnv {
        MapEnv {
            vars: HashMap::from([("a", Value::int(7)), ("b", Value::Float(2.5))]),
            arrays: HashMap::from([("x", vec![Value::int(3), Value::int(-4)])]),
        }
    }

    fn run(src: &str) -> Value {
        eval(&parse(src).unwrap(), &env()).unwrap()
    }

    #[test]
    fn integer_arithmetic_truncates() {
        assert_eq!(run("a / 2"), Value::int(3));
        assert_eq!(run("-a / 2"), Value::int(-3));
        assert_eq!(run("a % 4"), Value::int(3));
    }

    #[test]
    fn mixed_arithmetic_promotes_to_float() {
        assert_eq!(run("a * b"), Value::Float(17.5));
        assert_eq!(run("a / 2.0"), Value::Float(3.5));
    }

    #[test]
    fn comparisons_and_logic_yield_ints() {
        assert_eq!(run("a > b"), Value::int(1));
        assert_eq!(run("a == 7 && !0"), Value::int(1));
        assert_eq!(run("0 || 0.0"), Value::int(0));
    }

    #[test]
    fn short_circuit_skips_errors() {
        assert_eq!(run("0 && (1 / 0)"), Value::int(0));
        assert_eq!(run("1 || (1 / 0)"), Value::int(1));
    }

    #[test]
    fn arrays_and_functions() {
        assert_eq!(run("max(x[0], x[1])"), Value::int(3));
        assert_eq!(run("abs(x[1])"), Value::int(4));
        assert_eq!(run("fmax(x[1], 0)"), Value::Float(0.0));
        assert_eq!(run("sqrt(16.0)"), Value::Float(4.0));
        assert_eq!(run("pow(2, 10)"), Value::Float(1024.0));
    }

    #[test]
    fn max_with_negative_infinity_neutral() {
        assert_eq!(run("max(-INFINITY, 9)"), Value::Float(9.0));
    }

    #[test]
    fn casts_follow_c_conversions() {
        assert_eq!(run("(unsigned char)300"), Value::int(44));
        assert_eq!(run("(int)b"), Value::int(2));
        assert_eq!(run("(float)0.1"), Value::Float(0.1_f32 as f64));
    }

    #[test]
    fn bitwise_on_integers() {
        assert_eq!(run("a & 3"), Value::int(3));
        assert_eq!(run("a | 8"), Value::int(15));
        assert_eq!(run("a ^ 1"), Value::int(6));
        assert_eq!(run("1 << 4"), Value::int(16));
        assert_eq!(run("~0"), Value::int(-1));
    }

    #[test]
    fn unsigned_int_wraps_before_dividing() {
        let env = MapEnv {
            vars: HashMap::from([("u", Value::uint(1)), ("v", Value::uint(2))]),
            arrays: HashMap::new(),
        };
        let eval_src = |src: &str| eval(&parse(src).unwrap(), &env).unwrap();
        assert_eq!(eval_src("(u - v) / 2"), Value::uint(2_147_483_647));
        // int operands convert to unsigned int
        assert_eq!(eval_src("u - 2 > 0"), Value::int(1));
        assert_eq!(eval_src("(u - v) >> 28"), Value::uint(15));
        assert_eq!(eval_src("max(u - v, v)"), Value::uint(u32::MAX));
    }

    #[test]
    fn unsigned_long_keeps_high_bit() {
        let high = Value::from_scalar(ScalarValue::U64(1 << 63));
        assert_eq!(high, Value::Int { value: 1 << 63, ty: IntType::ULong });
        let env = MapEnv {
            vars: HashMap::from([("h", high), ("one", Value::from_scalar(ScalarValue::U64(1)))]),
            arrays: HashMap::new(),
        };
        let eval_src = |src: &str| eval(&parse(src).unwrap(), &env).unwrap();
        assert_eq!(eval_src("max(h, one)"), high);
        assert_eq!(eval_src("h > one"), Value::int(1));
        assert_eq!(eval_src("h / 2"), Value::Int { value: 1 << 62, ty: IntType::ULong });
        assert_eq!(eval_src("h % 3"), Value::Int { value: (1_u64 << 63) as i128 % 3, ty: IntType::ULong });
        assert_eq!(high.to_scalar(DType::U64).unwrap(), ScalarValue::U64(1 << 63));
    }

    #[test]
    fn signed_int_wraps_at_32_bits() {
        assert_eq!(run("2147483647 + 1"), Value::int(i32::MIN));
        // the literal does not fit in int, so the negation is a long
        assert_eq!(run("-2147483648"), Value::Int { value: -2_147_483_648, ty: IntType::Long });
        assert_eq!(run("4294967296 + 1"), Value::Int { value: 4_294_967_297, ty: IntType::Long });
        assert_eq!(run("-8 >> 1"), Value::int(-4));
    }

    #[test]
    fn narrow_types_promote_to_int() {
        let byte = Value::from_scalar(ScalarValue::U8(200));
        assert_eq!(byte, Value::int(200));
        assert_eq!(Value::from_scalar(ScalarValue::U32(7)), Value::uint(7));
        assert_eq!(Value::from_scalar(ScalarValue::I64(-1)), Value::Int { value: -1, ty: IntType::Long });
    }

    #[test]
    fn ternary_selects_branch() {
        assert_eq!(run("a > 5 ? x[0] : x[1]"), Value::int(3));
    }

    #[test]
    fn failures_are_device_errors() {
        let env = env();
        for src in ["c + 1", "a / 0", "b % 2", "x[b]", "x[5]", "SQ(a)", "max(a)", "b & 1", "b.x"] {
            let err = eval(&parse(src).unwrap(), &env).unwrap_err();
            assert!(matches!(err, ReduxError::Device { .. }), "{src}: {err}");
        }
    }
}
