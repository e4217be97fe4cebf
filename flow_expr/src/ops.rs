// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The numbered operation table.
//!
//! An `operation` instruction carries an index into an [`Operations`] table. Each entry declares
//! its arity; the evaluator pops that many operands (first pushed is first argument), resolves
//! references to their current values, and pushes the entry's result.
//!
//! [`Operations::standard`] builds the built-in table in its canonical order (see [`op`]).
//! Hosts may append further entries with [`Operations::register`].

use alloc::string::String;
use alloc::vec::Vec;
use core::cmp::Ordering;

use crate::eval::EvalError;
use crate::value::Value;

/// Canonical indices of the built-in operations.
pub mod op {
    /// `a + b` (string concatenation if either operand is a string).
    pub const ADD: u16 = 0;
    /// `a - b`.
    pub const SUB: u16 = 1;
    /// `a * b`.
    pub const MUL: u16 = 2;
    /// `a / b`.
    pub const DIV: u16 = 3;
    /// `a % b`.
    pub const MOD: u16 = 4;
    /// `a << b`.
    pub const LEFT_SHIFT: u16 = 5;
    /// `a >> b`.
    pub const RIGHT_SHIFT: u16 = 6;
    /// `a & b`.
    pub const BINARY_AND: u16 = 7;
    /// `a | b`.
    pub const BINARY_OR: u16 = 8;
    /// `a ^ b`.
    pub const BINARY_XOR: u16 = 9;
    /// `a == b`.
    pub const EQUAL: u16 = 10;
    /// `a != b`.
    pub const NOT_EQUAL: u16 = 11;
    /// `a < b`.
    pub const LESS: u16 = 12;
    /// `a > b`.
    pub const GREATER: u16 = 13;
    /// `a <= b`.
    pub const LESS_OR_EQUAL: u16 = 14;
    /// `a >= b`.
    pub const GREATER_OR_EQUAL: u16 = 15;
    /// `a && b`.
    pub const LOGICAL_AND: u16 = 16;
    /// `a || b`.
    pub const LOGICAL_OR: u16 = 17;
    /// `+a`.
    pub const UNARY_PLUS: u16 = 18;
    /// `-a`.
    pub const UNARY_MINUS: u16 = 19;
    /// `~a`.
    pub const BINARY_ONE_COMPLEMENT: u16 = 20;
    /// `!a`.
    pub const NOT: u16 = 21;
    /// `cond ? a : b`.
    pub const CONDITIONAL: u16 = 22;
    /// Current value of a list iterator.
    pub const FLOW_IT: u16 = 23;
    /// `Math.sin(a)`.
    pub const MATH_SIN: u16 = 24;
    /// `Math.cos(a)`.
    pub const MATH_COS: u16 = 25;
    /// `Math.log(a)`.
    pub const MATH_LOG: u16 = 26;
    /// `String.find(haystack, needle)`.
    pub const STRING_FIND: u16 = 27;
    /// `Math.sqrt(a)`.
    pub const MATH_SQRT: u16 = 28;
    /// `Math.abs(a)`.
    pub const MATH_ABS: u16 = 29;
    /// `Math.floor(a)`.
    pub const MATH_FLOOR: u16 = 30;
    /// `Math.ceil(a)`.
    pub const MATH_CEIL: u16 = 31;
    /// `Math.round(a)`.
    pub const MATH_ROUND: u16 = 32;
    /// `Math.min(a, b)`.
    pub const MATH_MIN: u16 = 33;
    /// `Math.max(a, b)`.
    pub const MATH_MAX: u16 = 34;
    /// `String.length(s)`.
    pub const STRING_LENGTH: u16 = 35;
    /// `String.substring(s, start, end)`.
    pub const STRING_SUBSTRING: u16 = 36;
    /// `Array.length(a)`.
    pub const ARRAY_LENGTH: u16 = 37;
}

/// Ambient data available to operations.
#[derive(Copy, Clone, Debug, Default)]
pub struct OperationEnv<'a> {
    /// Iterator values of the enclosing list/grid context, innermost first.
    pub iterators: &'a [i32],
}

/// Signature of an operation implementation.
///
/// `args` always has exactly the entry's declared arity, and holds resolved (non-reference)
/// values.
pub type OperationFn = fn(args: &[Value], env: &OperationEnv<'_>) -> Result<Value, EvalError>;

/// One entry of the operation table.
#[derive(Copy, Clone, Debug)]
pub struct OperationEntry {
    /// Display name used in diagnostics.
    pub name: &'static str,
    /// Number of operands popped from the stack.
    pub arity: u8,
    /// Implementation.
    pub func: OperationFn,
}

/// Operation table indexed by the `operation` instruction operand.
#[derive(Clone, Debug, Default)]
pub struct Operations {
    entries: Vec<OperationEntry>,
}

impl Operations {
    /// Creates an empty table.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates the built-in table in canonical order.
    #[must_use]
    pub fn standard() -> Self {
        let mut ops = Self::empty();
        for (name, arity, func) in STANDARD {
            ops.register(name, arity, func);
        }
        ops
    }

    /// Appends an operation and returns its index.
    pub fn register(&mut self, name: &'static str, arity: u8, func: OperationFn) -> u16 {
        let index = u16::try_from(self.entries.len()).unwrap_or(u16::MAX);
        self.entries.push(OperationEntry { name, arity, func });
        index
    }

    /// Looks up an entry by index.
    #[inline]
    #[must_use]
    pub fn get(&self, index: u16) -> Option<&OperationEntry> {
        self.entries.get(usize::from(index))
    }

    /// Looks up an entry index by name.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<u16> {
        self.entries
            .iter()
            .position(|e| e.name == name)
            .and_then(|i| u16::try_from(i).ok())
    }

    /// Number of entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the table is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

const STANDARD: [(&str, u8, OperationFn); 38] = [
    ("add", 2, op_add),
    ("sub", 2, op_sub),
    ("mul", 2, op_mul),
    ("div", 2, op_div),
    ("mod", 2, op_mod),
    ("left_shift", 2, op_left_shift),
    ("right_shift", 2, op_right_shift),
    ("binary_and", 2, op_binary_and),
    ("binary_or", 2, op_binary_or),
    ("binary_xor", 2, op_binary_xor),
    ("equal", 2, op_equal),
    ("not_equal", 2, op_not_equal),
    ("less", 2, op_less),
    ("greater", 2, op_greater),
    ("less_or_equal", 2, op_less_or_equal),
    ("greater_or_equal", 2, op_greater_or_equal),
    ("logical_and", 2, op_logical_and),
    ("logical_or", 2, op_logical_or),
    ("unary_plus", 1, op_unary_plus),
    ("unary_minus", 1, op_unary_minus),
    ("binary_one_complement", 1, op_binary_one_complement),
    ("not", 1, op_not),
    ("conditional", 3, op_conditional),
    ("flow_it", 1, op_flow_it),
    ("math_sin", 1, op_math_sin),
    ("math_cos", 1, op_math_cos),
    ("math_log", 1, op_math_log),
    ("string_find", 2, op_string_find),
    ("math_sqrt", 1, op_math_sqrt),
    ("math_abs", 1, op_math_abs),
    ("math_floor", 1, op_math_floor),
    ("math_ceil", 1, op_math_ceil),
    ("math_round", 1, op_math_round),
    ("math_min", 2, op_math_min),
    ("math_max", 2, op_math_max),
    ("string_length", 1, op_string_length),
    ("string_substring", 3, op_string_substring),
    ("array_length", 1, op_array_length),
];

/// Numeric promotion rank: int32 < int64 < float < double.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Rank {
    Int32,
    Int64,
    Float,
    Double,
}

fn rank(op: &'static str, v: &Value) -> Result<Rank, EvalError> {
    match v {
        Value::Bool(_) | Value::Int32(_) => Ok(Rank::Int32),
        Value::Int64(_) => Ok(Rank::Int64),
        Value::Float(_) => Ok(Rank::Float),
        Value::Double(_) | Value::Str(_) => Ok(Rank::Double),
        other => Err(EvalError::TypeMismatch {
            op,
            kind: other.kind(),
        }),
    }
}

struct Arith {
    name: &'static str,
    int32: fn(i32, i32) -> Option<i32>,
    int64: fn(i64, i64) -> Option<i64>,
    float: fn(f32, f32) -> f32,
    double: fn(f64, f64) -> f64,
}

fn arithmetic(a: &Value, b: &Value, arith: &Arith) -> Result<Value, EvalError> {
    if a.is_undefined_or_null() || b.is_undefined_or_null() {
        return Ok(Value::Undefined);
    }
    let rank = rank(arith.name, a)?.max(rank(arith.name, b)?);
    Ok(match rank {
        Rank::Double => Value::Double((arith.double)(a.to_double()?, b.to_double()?)),
        Rank::Float => Value::Float((arith.float)(a.to_float()?, b.to_float()?)),
        Rank::Int64 => Value::Int64(
            (arith.int64)(a.to_int64()?, b.to_int64()?).ok_or(EvalError::DivisionByZero)?,
        ),
        Rank::Int32 => Value::Int32(
            (arith.int32)(a.to_int32()?, b.to_int32()?).ok_or(EvalError::DivisionByZero)?,
        ),
    })
}

fn op_add(args: &[Value], _env: &OperationEnv<'_>) -> Result<Value, EvalError> {
    let (a, b) = (&args[0], &args[1]);
    if matches!(a, Value::Str(_)) || matches!(b, Value::Str(_)) {
        let mut text = String::new();
        a.to_text(&mut text);
        b.to_text(&mut text);
        return Ok(Value::string(&text));
    }
    arithmetic(
        a,
        b,
        &Arith {
            name: "add",
            int32: |x, y| Some(x.wrapping_add(y)),
            int64: |x, y| Some(x.wrapping_add(y)),
            float: |x, y| x + y,
            double: |x, y| x + y,
        },
    )
}

fn op_sub(args: &[Value], _env: &OperationEnv<'_>) -> Result<Value, EvalError> {
    arithmetic(
        &args[0],
        &args[1],
        &Arith {
            name: "sub",
            int32: |x, y| Some(x.wrapping_sub(y)),
            int64: |x, y| Some(x.wrapping_sub(y)),
            float: |x, y| x - y,
            double: |x, y| x - y,
        },
    )
}

fn op_mul(args: &[Value], _env: &OperationEnv<'_>) -> Result<Value, EvalError> {
    arithmetic(
        &args[0],
        &args[1],
        &Arith {
            name: "mul",
            int32: |x, y| Some(x.wrapping_mul(y)),
            int64: |x, y| Some(x.wrapping_mul(y)),
            float: |x, y| x * y,
            double: |x, y| x * y,
        },
    )
}

fn op_div(args: &[Value], _env: &OperationEnv<'_>) -> Result<Value, EvalError> {
    arithmetic(
        &args[0],
        &args[1],
        &Arith {
            name: "div",
            int32: |x, y| (y != 0).then(|| x.wrapping_div(y)),
            int64: |x, y| (y != 0).then(|| x.wrapping_div(y)),
            float: |x, y| x / y,
            double: |x, y| x / y,
        },
    )
}

fn op_mod(args: &[Value], _env: &OperationEnv<'_>) -> Result<Value, EvalError> {
    arithmetic(
        &args[0],
        &args[1],
        &Arith {
            name: "mod",
            int32: |x, y| (y != 0).then(|| x.wrapping_rem(y)),
            int64: |x, y| (y != 0).then(|| x.wrapping_rem(y)),
            float: |x, y| x % y,
            double: |x, y| x % y,
        },
    )
}

fn integer_operands(
    name: &'static str,
    a: &Value,
    b: &Value,
) -> Result<Option<(i64, i64, bool)>, EvalError> {
    if a.is_undefined_or_null() || b.is_undefined_or_null() {
        return Ok(None);
    }
    for v in [a, b] {
        if !v.is_numeric() {
            return Err(EvalError::TypeMismatch {
                op: name,
                kind: v.kind(),
            });
        }
    }
    let wide = matches!(a, Value::Int64(_)) || matches!(b, Value::Int64(_));
    Ok(Some((a.to_int64()?, b.to_int64()?, wide)))
}

fn integer_result(v: i64, wide: bool) -> Value {
    if wide {
        Value::Int64(v)
    } else {
        #[allow(
            clippy::cast_possible_truncation,
            reason = "int32 bitwise results are computed in i64 and wrap back"
        )]
        Value::Int32(v as i32)
    }
}

fn bitwise(
    name: &'static str,
    args: &[Value],
    f: fn(i64, i64, bool) -> i64,
) -> Result<Value, EvalError> {
    Ok(match integer_operands(name, &args[0], &args[1])? {
        Some((a, b, wide)) => integer_result(f(a, b, wide), wide),
        None => Value::Undefined,
    })
}

fn shift_amount(b: i64, wide: bool) -> u32 {
    let bits = if wide { 63 } else { 31 };
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "shift amounts are masked to the operand width"
    )]
    let amount = (b & bits) as u32;
    amount
}

fn op_left_shift(args: &[Value], _env: &OperationEnv<'_>) -> Result<Value, EvalError> {
    bitwise("left_shift", args, |a, b, wide| {
        if wide {
            a.wrapping_shl(shift_amount(b, wide))
        } else {
            #[allow(
                clippy::cast_possible_truncation,
                reason = "int32 shift operates on the low 32 bits"
            )]
            let narrow = a as i32;
            i64::from(narrow.wrapping_shl(shift_amount(b, wide)))
        }
    })
}

fn op_right_shift(args: &[Value], _env: &OperationEnv<'_>) -> Result<Value, EvalError> {
    bitwise("right_shift", args, |a, b, wide| {
        a.wrapping_shr(shift_amount(b, wide))
    })
}

fn op_binary_and(args: &[Value], _env: &OperationEnv<'_>) -> Result<Value, EvalError> {
    bitwise("binary_and", args, |a, b, _| a & b)
}

fn op_binary_or(args: &[Value], _env: &OperationEnv<'_>) -> Result<Value, EvalError> {
    bitwise("binary_or", args, |a, b, _| a | b)
}

fn op_binary_xor(args: &[Value], _env: &OperationEnv<'_>) -> Result<Value, EvalError> {
    bitwise("binary_xor", args, |a, b, _| a ^ b)
}

/// Loose equality used by `==`, `!=` and the compare component.
///
/// Strings compare by content, arrays by identity, undefined only equals undefined and null only
/// equals null. Mixed numeric kinds compare by value.
#[must_use]
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Array(_), _) | (_, Value::Array(_)) => a == b,
        _ if a.is_undefined_or_null() || b.is_undefined_or_null() => a.kind() == b.kind(),
        _ => match (a.to_double(), b.to_double()) {
            (Ok(x), Ok(y)) => x == y,
            _ => false,
        },
    }
}

/// Ordering used by the relational operators.
///
/// Two strings compare lexicographically; anything else compares numerically.
pub fn compare_values(op: &'static str, a: &Value, b: &Value) -> Result<Ordering, EvalError> {
    if let (Value::Str(x), Value::Str(y)) = (a, b) {
        return Ok(x.cmp(y));
    }
    let x = a.to_double().map_err(|_| EvalError::TypeMismatch {
        op,
        kind: a.kind(),
    })?;
    let y = b.to_double().map_err(|_| EvalError::TypeMismatch {
        op,
        kind: b.kind(),
    })?;
    x.partial_cmp(&y).ok_or(EvalError::TypeMismatch {
        op,
        kind: a.kind(),
    })
}

fn op_equal(args: &[Value], _env: &OperationEnv<'_>) -> Result<Value, EvalError> {
    Ok(Value::Bool(values_equal(&args[0], &args[1])))
}

fn op_not_equal(args: &[Value], _env: &OperationEnv<'_>) -> Result<Value, EvalError> {
    Ok(Value::Bool(!values_equal(&args[0], &args[1])))
}

fn op_less(args: &[Value], _env: &OperationEnv<'_>) -> Result<Value, EvalError> {
    Ok(Value::Bool(compare_values("less", &args[0], &args[1])?.is_lt()))
}

fn op_greater(args: &[Value], _env: &OperationEnv<'_>) -> Result<Value, EvalError> {
    Ok(Value::Bool(
        compare_values("greater", &args[0], &args[1])?.is_gt(),
    ))
}

fn op_less_or_equal(args: &[Value], _env: &OperationEnv<'_>) -> Result<Value, EvalError> {
    Ok(Value::Bool(
        compare_values("less_or_equal", &args[0], &args[1])?.is_le(),
    ))
}

fn op_greater_or_equal(args: &[Value], _env: &OperationEnv<'_>) -> Result<Value, EvalError> {
    Ok(Value::Bool(
        compare_values("greater_or_equal", &args[0], &args[1])?.is_ge(),
    ))
}

fn op_logical_and(args: &[Value], _env: &OperationEnv<'_>) -> Result<Value, EvalError> {
    Ok(Value::Bool(args[0].to_bool() && args[1].to_bool()))
}

fn op_logical_or(args: &[Value], _env: &OperationEnv<'_>) -> Result<Value, EvalError> {
    Ok(Value::Bool(args[0].to_bool() || args[1].to_bool()))
}

fn op_unary_plus(args: &[Value], _env: &OperationEnv<'_>) -> Result<Value, EvalError> {
    match &args[0] {
        Value::Bool(b) => Ok(Value::Int32(i32::from(*b))),
        v @ (Value::Int32(_)
        | Value::Int64(_)
        | Value::Float(_)
        | Value::Double(_)
        | Value::Undefined
        | Value::Null) => Ok(v.clone()),
        Value::Str(_) => Ok(Value::Double(args[0].to_double()?)),
        other => Err(EvalError::TypeMismatch {
            op: "unary_plus",
            kind: other.kind(),
        }),
    }
}

fn op_unary_minus(args: &[Value], _env: &OperationEnv<'_>) -> Result<Value, EvalError> {
    match &args[0] {
        Value::Bool(b) => Ok(Value::Int32(-i32::from(*b))),
        Value::Int32(v) => Ok(Value::Int32(v.wrapping_neg())),
        Value::Int64(v) => Ok(Value::Int64(v.wrapping_neg())),
        Value::Float(v) => Ok(Value::Float(-v)),
        Value::Double(v) => Ok(Value::Double(-v)),
        Value::Str(_) => Ok(Value::Double(-args[0].to_double()?)),
        Value::Undefined | Value::Null => Ok(Value::Undefined),
        other => Err(EvalError::TypeMismatch {
            op: "unary_minus",
            kind: other.kind(),
        }),
    }
}

fn op_binary_one_complement(args: &[Value], _env: &OperationEnv<'_>) -> Result<Value, EvalError> {
    match &args[0] {
        Value::Int64(v) => Ok(Value::Int64(!v)),
        Value::Undefined | Value::Null => Ok(Value::Undefined),
        v if v.is_numeric() => Ok(Value::Int32(!v.to_int32()?)),
        other => Err(EvalError::TypeMismatch {
            op: "binary_one_complement",
            kind: other.kind(),
        }),
    }
}

fn op_not(args: &[Value], _env: &OperationEnv<'_>) -> Result<Value, EvalError> {
    Ok(Value::Bool(!args[0].to_bool()))
}

fn op_conditional(args: &[Value], _env: &OperationEnv<'_>) -> Result<Value, EvalError> {
    Ok(if args[0].to_bool() {
        args[1].clone()
    } else {
        args[2].clone()
    })
}

fn op_flow_it(args: &[Value], env: &OperationEnv<'_>) -> Result<Value, EvalError> {
    let index = args[0].to_int32()?;
    usize::try_from(index)
        .ok()
        .and_then(|i| env.iterators.get(i))
        .map(|v| Value::Int32(*v))
        .ok_or(EvalError::InvalidIterator(index))
}

fn number(op: &'static str, v: &Value) -> Result<f64, EvalError> {
    v.to_double().map_err(|_| EvalError::TypeMismatch {
        op,
        kind: v.kind(),
    })
}

macro_rules! std_math {
    ($fn_name:ident, $op:literal, $method:ident) => {
        #[cfg(feature = "std")]
        fn $fn_name(args: &[Value], _env: &OperationEnv<'_>) -> Result<Value, EvalError> {
            if args[0].is_undefined_or_null() {
                return Ok(Value::Undefined);
            }
            Ok(Value::Double(number($op, &args[0])?.$method()))
        }

        #[cfg(not(feature = "std"))]
        fn $fn_name(_args: &[Value], _env: &OperationEnv<'_>) -> Result<Value, EvalError> {
            Err(EvalError::Unsupported($op))
        }
    };
}

std_math!(op_math_sin, "math_sin", sin);
std_math!(op_math_cos, "math_cos", cos);
std_math!(op_math_log, "math_log", ln);
std_math!(op_math_sqrt, "math_sqrt", sqrt);
std_math!(op_math_floor, "math_floor", floor);
std_math!(op_math_ceil, "math_ceil", ceil);
std_math!(op_math_round, "math_round", round);

fn op_math_abs(args: &[Value], _env: &OperationEnv<'_>) -> Result<Value, EvalError> {
    match &args[0] {
        Value::Int32(v) => Ok(Value::Int32(v.wrapping_abs())),
        Value::Int64(v) => Ok(Value::Int64(v.wrapping_abs())),
        Value::Float(v) => Ok(Value::Float(v.abs())),
        Value::Undefined | Value::Null => Ok(Value::Undefined),
        other => Ok(Value::Double(number("math_abs", other)?.abs())),
    }
}

fn min_max(name: &'static str, args: &[Value], pick_first: fn(Ordering) -> bool) -> Result<Value, EvalError> {
    let ordering = compare_values(name, &args[0], &args[1])?;
    Ok(if pick_first(ordering) {
        args[0].clone()
    } else {
        args[1].clone()
    })
}

fn op_math_min(args: &[Value], _env: &OperationEnv<'_>) -> Result<Value, EvalError> {
    min_max("math_min", args, Ordering::is_le)
}

fn op_math_max(args: &[Value], _env: &OperationEnv<'_>) -> Result<Value, EvalError> {
    min_max("math_max", args, Ordering::is_ge)
}

fn string_arg<'a>(op: &'static str, v: &'a Value) -> Result<&'a str, EvalError> {
    v.as_str().ok_or(EvalError::TypeMismatch { op, kind: v.kind() })
}

fn char_count_value(n: usize) -> Value {
    Value::Int32(i32::try_from(n).unwrap_or(i32::MAX))
}

fn op_string_find(args: &[Value], _env: &OperationEnv<'_>) -> Result<Value, EvalError> {
    let haystack = string_arg("string_find", &args[0])?;
    let needle = string_arg("string_find", &args[1])?;
    Ok(match haystack.find(needle) {
        Some(byte_pos) => char_count_value(haystack[..byte_pos].chars().count()),
        None => Value::Int32(-1),
    })
}

fn op_string_length(args: &[Value], _env: &OperationEnv<'_>) -> Result<Value, EvalError> {
    let s = string_arg("string_length", &args[0])?;
    Ok(char_count_value(s.chars().count()))
}

fn op_string_substring(args: &[Value], _env: &OperationEnv<'_>) -> Result<Value, EvalError> {
    let s = string_arg("string_substring", &args[0])?;
    let len = s.chars().count();
    let clamp = |v: i64| usize::try_from(v.max(0)).unwrap_or(usize::MAX).min(len);
    let start = clamp(args[1].to_int64()?);
    let end = if args[2].is_undefined_or_null() {
        len
    } else {
        clamp(args[2].to_int64()?)
    };
    let text: String = s
        .chars()
        .skip(start)
        .take(end.saturating_sub(start))
        .collect();
    Ok(Value::string(&text))
}

fn op_array_length(args: &[Value], _env: &OperationEnv<'_>) -> Result<Value, EvalError> {
    match &args[0] {
        Value::Array(a) => Ok(char_count_value(a.len())),
        other => Err(EvalError::TypeMismatch {
            op: "array_length",
            kind: other.kind(),
        }),
    }
}
