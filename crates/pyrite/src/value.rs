use std::{cmp::Ordering, fmt::Write};

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{ToPrimitive, Zero};

use crate::{
    builtins::Builtin,
    dispatch::BinaryOp,
    exception_private::{ExcType, RunResult},
    heap::{Heap, HeapData, HeapId},
    intern::StringId,
};

/// Uniform representation of a Python object reference.
///
/// Small immutable values (None, bools, ints, floats, interned strings, builtin callables)
/// are stored inline; everything else lives in the [`Heap`] arena and is referenced via
/// `Ref(HeapId)`. Values are `Copy`: the heap is traced, so copying a reference needs no
/// bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    None,
    /// Returned by binary and comparison dunders to signal the operand types are unsupported.
    NotImplemented,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// A string whose text lives in the global interner.
    InternStr(StringId),
    /// A builtin function, method descriptor, or getset descriptor.
    Builtin(Builtin),
    Ref(HeapId),
}

impl Value {
    /// Identity comparison, Python's `is`.
    #[must_use]
    pub fn is_same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) | (Self::NotImplemented, Self::NotImplemented) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::InternStr(a), Self::InternStr(b)) => a == b,
            (Self::Builtin(a), Self::Builtin(b)) => a == b,
            (Self::Ref(a), Self::Ref(b)) => a == b,
            _ => false,
        }
    }

    #[inline]
    #[must_use]
    pub fn ref_id(self) -> Option<HeapId> {
        match self {
            Self::Ref(id) => Some(id),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(i),
            Self::Bool(b) => Some(i64::from(b)),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(f),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_none(self) -> bool {
        matches!(self, Self::None)
    }

    /// Repr of an immediate value; `None` for values that need the heap or user code.
    pub(crate) fn immediate_repr(self) -> Option<String> {
        match self {
            Self::None => Some("None".to_owned()),
            Self::NotImplemented => Some("NotImplemented".to_owned()),
            Self::Bool(true) => Some("True".to_owned()),
            Self::Bool(false) => Some("False".to_owned()),
            Self::Int(i) => Some(i.to_string()),
            Self::Float(f) => Some(format_float(f)),
            Self::InternStr(id) => Some(string_repr(id.as_str())),
            Self::Builtin(_) | Self::Ref(_) => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<StringId> for Value {
    fn from(id: StringId) -> Self {
        Self::InternStr(id)
    }
}

impl From<HeapId> for Value {
    fn from(id: HeapId) -> Self {
        Self::Ref(id)
    }
}

impl From<Builtin> for Value {
    fn from(b: Builtin) -> Self {
        Self::Builtin(b)
    }
}

/// Numeric view of a value: bools and ints are `Int`, heap longs are `Long`.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Number<'h> {
    Int(i64),
    Long(&'h BigInt),
    Float(f64),
}

impl Number<'_> {
    fn to_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Long(b) => b.to_f64().unwrap_or(f64::NAN),
            Self::Float(f) => f,
        }
    }

    fn to_bigint(self) -> Option<BigInt> {
        match self {
            Self::Int(i) => Some(BigInt::from(i)),
            Self::Long(b) => Some(b.clone()),
            Self::Float(_) => None,
        }
    }
}

/// Returns the numeric view of `value`, if it is a number.
pub(crate) fn number(heap: &Heap, value: Value) -> Option<Number<'_>> {
    match value {
        Value::Bool(b) => Some(Number::Int(i64::from(b))),
        Value::Int(i) => Some(Number::Int(i)),
        Value::Float(f) => Some(Number::Float(f)),
        Value::Ref(id) => match heap.get(id) {
            HeapData::Long(b) => Some(Number::Long(b)),
            _ => None,
        },
        _ => None,
    }
}

/// Returns the text of a str value, interned or heap allocated.
pub(crate) fn str_content(heap: &Heap, value: Value) -> Option<&str> {
    match value {
        Value::InternStr(id) => Some(id.as_str()),
        Value::Ref(id) => match heap.get(id) {
            HeapData::Str(s) => Some(s.as_str()),
            _ => None,
        },
        _ => None,
    }
}

enum NumericResult {
    Int(i64),
    Long(BigInt),
    Float(f64),
}

/// Applies `op` natively to builtin operands (numbers, strings, lists, tuples).
///
/// Returns `Ok(None)` when the operand types are not natively supported, which callers turn
/// into `NotImplemented` or a `TypeError`.
pub(crate) fn native_binary(heap: &mut Heap, op: BinaryOp, left: Value, right: Value) -> RunResult<Option<Value>> {
    if let (Some(a), Some(b)) = (number(heap, left), number(heap, right)) {
        let result = match numeric_binary(op, a, b)? {
            Some(result) => result,
            None => return Ok(None),
        };
        return Ok(Some(match result {
            NumericResult::Int(i) => Value::Int(i),
            NumericResult::Float(f) => Value::Float(f),
            NumericResult::Long(b) => Value::Ref(heap.allocate(HeapData::Long(b))?),
        }));
    }
    sequence_binary(heap, op, left, right)
}

fn numeric_binary(op: BinaryOp, a: Number<'_>, b: Number<'_>) -> RunResult<Option<NumericResult>> {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => match int_binary(op, x, y)? {
            Some(i) => Ok(Some(NumericResult::Int(i))),
            // overflowed: redo the operation in arbitrary precision
            None => long_binary(op, &BigInt::from(x), &BigInt::from(y)).map(|r| r.map(NumericResult::Long)),
        },
        (Number::Float(_), _) | (_, Number::Float(_)) => {
            float_binary(op, a.to_f64(), b.to_f64()).map(|r| r.map(NumericResult::Float))
        }
        _ => match (a.to_bigint(), b.to_bigint()) {
            (Some(x), Some(y)) => long_binary(op, &x, &y).map(|r| r.map(NumericResult::Long)),
            _ => Ok(None),
        },
    }
}

fn zero_division() -> crate::exception_private::RunError {
    ExcType::ZeroDivisionError.error("integer division or modulo by zero")
}

/// Machine-int arithmetic; `Ok(None)` signals overflow.
fn int_binary(op: BinaryOp, a: i64, b: i64) -> RunResult<Option<i64>> {
    Ok(match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::Div | BinaryOp::FloorDiv => {
            if b == 0 {
                return Err(zero_division());
            }
            a.checked_div(b).map(|q| if a % b != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q })
        }
        BinaryOp::Mod => {
            if b == 0 {
                return Err(zero_division());
            }
            a.checked_rem(b).map(|r| if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r })
        }
        BinaryOp::And => Some(a & b),
        BinaryOp::Or => Some(a | b),
        BinaryOp::Xor => Some(a ^ b),
    })
}

fn long_binary(op: BinaryOp, a: &BigInt, b: &BigInt) -> RunResult<Option<BigInt>> {
    Ok(Some(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::FloorDiv => {
            if b.is_zero() {
                return Err(zero_division());
            }
            a.div_floor(b)
        }
        BinaryOp::Mod => {
            if b.is_zero() {
                return Err(zero_division());
            }
            a.mod_floor(b)
        }
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
    }))
}

fn float_binary(op: BinaryOp, a: f64, b: f64) -> RunResult<Option<f64>> {
    let needs_divisor = matches!(op, BinaryOp::Div | BinaryOp::FloorDiv | BinaryOp::Mod);
    if needs_divisor && b == 0.0 {
        let message = match op {
            BinaryOp::Mod => "float modulo",
            BinaryOp::FloorDiv => "float divmod()",
            _ => "float division by zero",
        };
        return Err(ExcType::ZeroDivisionError.error(message));
    }
    Ok(match op {
        BinaryOp::Add => Some(a + b),
        BinaryOp::Sub => Some(a - b),
        BinaryOp::Mul => Some(a * b),
        BinaryOp::Div => Some(a / b),
        BinaryOp::FloorDiv => Some((a / b).floor()),
        BinaryOp::Mod => {
            let r = a % b;
            Some(if r != 0.0 && ((r < 0.0) != (b < 0.0)) { r + b } else { r })
        }
        BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => None,
    })
}

/// `str + str`, `str * int`, list and tuple concatenation and repetition.
fn sequence_binary(heap: &mut Heap, op: BinaryOp, left: Value, right: Value) -> RunResult<Option<Value>> {
    if let (Some(a), Some(b)) = (str_content(heap, left), str_content(heap, right)) {
        if op != BinaryOp::Add {
            return Ok(None);
        }
        let joined = format!("{a}{b}");
        return Ok(Some(Value::Ref(heap.allocate(HeapData::Str(joined))?)));
    }
    if op == BinaryOp::Mul {
        let (seq, count) = match (left.as_int(), right.as_int()) {
            (None, Some(n)) => (left, n),
            (Some(n), None) => (right, n),
            _ => return Ok(None),
        };
        let count = usize::try_from(count).unwrap_or(0);
        if let Some(s) = str_content(heap, seq) {
            let total = s
                .len()
                .checked_mul(count)
                .filter(|&n| isize::try_from(n).is_ok())
                .ok_or_else(|| ExcType::OverflowError.error("repeated string is too long"))?;
            heap.check_result_length(total)?;
            let mut repeated = String::new();
            repeated.try_reserve_exact(total).map_err(|_| ExcType::MemoryError.bare())?;
            if total > 0 {
                (0..count).for_each(|_| repeated.push_str(s));
            }
            return Ok(Some(Value::Ref(heap.allocate(HeapData::Str(repeated))?)));
        }
        let Some(id) = seq.ref_id() else { return Ok(None) };
        let data = match heap.get(id) {
            HeapData::List(items) => HeapData::List(repeat_items(heap, items, count)?),
            HeapData::Tuple(items) => HeapData::Tuple(repeat_items(heap, items, count)?),
            _ => return Ok(None),
        };
        return Ok(Some(Value::Ref(heap.allocate(data)?)));
    }
    if op != BinaryOp::Add {
        return Ok(None);
    }
    let (Some(a), Some(b)) = (left.ref_id(), right.ref_id()) else {
        return Ok(None);
    };
    let data = match (heap.get(a), heap.get(b)) {
        (HeapData::List(x), HeapData::List(y)) => HeapData::List(x.iter().chain(y).copied().collect()),
        (HeapData::Tuple(x), HeapData::Tuple(y)) => HeapData::Tuple(x.iter().chain(y).copied().collect()),
        _ => return Ok(None),
    };
    Ok(Some(Value::Ref(heap.allocate(data)?)))
}

/// `items * count`; oversized results raise `MemoryError` instead of aborting the allocator.
fn repeat_items(heap: &Heap, items: &[Value], count: usize) -> RunResult<Vec<Value>> {
    let total = items.len().checked_mul(count).ok_or_else(|| ExcType::MemoryError.bare())?;
    heap.check_result_length(total)?;
    let mut out = Vec::new();
    out.try_reserve_exact(total).map_err(|_| ExcType::MemoryError.bare())?;
    if total > 0 {
        (0..count).for_each(|_| out.extend_from_slice(items));
    }
    Ok(out)
}

/// Orders two numbers or two strings; `None` when they are not natively comparable.
pub(crate) fn native_ordering(heap: &Heap, left: Value, right: Value) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (number(heap, left), number(heap, right)) {
        return match (a, b) {
            (Number::Int(x), Number::Int(y)) => Some(x.cmp(&y)),
            (Number::Float(_), _) | (_, Number::Float(_)) => a.to_f64().partial_cmp(&b.to_f64()),
            _ => Some(a.to_bigint()?.cmp(&b.to_bigint()?)),
        };
    }
    match (str_content(heap, left), str_content(heap, right)) {
        (Some(a), Some(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Python 2 float repr: shortest round-trip digits, `1.0` rather than `1`, `1e+16` exponents.
#[must_use]
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_owned();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_owned();
    }
    let raw = format!("{f:?}");
    let Some((mantissa, exponent)) = raw.split_once('e') else {
        return raw;
    };
    let (sign, digits) = match exponent.strip_prefix('-') {
        Some(d) => ('-', d),
        None => ('+', exponent),
    };
    let mantissa = mantissa.strip_suffix(".0").unwrap_or(mantissa);
    format!("{mantissa}e{sign}{digits:0>2}")
}

/// Python 2 string repr with single quotes, switching to double quotes when that avoids escapes.
#[must_use]
pub fn string_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floats_format_like_python_2() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(0.1), "0.1");
        assert_eq!(format_float(1e16), "1e+16");
        assert_eq!(format_float(1.5e-7), "1.5e-07");
        assert_eq!(format_float(f64::NEG_INFINITY), "-inf");
    }

    #[test]
    fn int_division_floors() {
        assert_eq!(int_binary(BinaryOp::Div, -7, 2).unwrap(), Some(-4));
        assert_eq!(int_binary(BinaryOp::Mod, -7, 2).unwrap(), Some(1));
        assert_eq!(int_binary(BinaryOp::Mod, 7, -2).unwrap(), Some(-1));
        assert_eq!(int_binary(BinaryOp::Add, i64::MAX, 1).unwrap(), None);
        assert!(int_binary(BinaryOp::FloorDiv, 1, 0).is_err());
    }

    #[test]
    fn string_repr_quotes() {
        assert_eq!(string_repr("abc"), "'abc'");
        assert_eq!(string_repr("it's"), "\"it's\"");
        assert_eq!(string_repr("a\nb"), "'a\\nb'");
    }
}
