// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Runtime value model for flow execution.
//!
//! Every input slot, local variable, global, constant and evaluator stack cell holds a [`Value`].
//! Shared payloads (strings and arrays) are reference counted with [`Rc`]; cloning a value bumps
//! the count and dropping it releases it. The four reference kinds ([`Value::Slot`],
//! [`Value::NativeVariable`], [`Value::FlowOutput`], [`Value::ArrayElement`]) only appear as
//! assignment targets or transiently on the evaluator stack.

use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::cmp::Ordering;
use core::fmt;
use core::fmt::Write as _;

/// A value conversion error.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConversionError {
    /// A string did not parse as a number.
    NotANumber,
    /// The value kind has no conversion to the requested type.
    WrongKind(ValueKind),
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotANumber => write!(f, "not a number"),
            Self::WrongKind(kind) => write!(f, "{kind} is not convertible"),
        }
    }
}

impl core::error::Error for ConversionError {}

/// Discriminant of a [`Value`], used for diagnostics.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// [`Value::Undefined`].
    Undefined,
    /// [`Value::Null`].
    Null,
    /// [`Value::Bool`].
    Boolean,
    /// [`Value::Int32`].
    Int32,
    /// [`Value::Int64`].
    Int64,
    /// [`Value::Float`].
    Float,
    /// [`Value::Double`].
    Double,
    /// [`Value::Str`].
    String,
    /// [`Value::Array`].
    Array,
    /// [`Value::Slot`].
    Slot,
    /// [`Value::NativeVariable`].
    NativeVariable,
    /// [`Value::FlowOutput`].
    FlowOutput,
    /// [`Value::ArrayElement`].
    ArrayElement,
}

impl ValueKind {
    /// Human-readable type name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Int32 => "integer",
            Self::Int64 => "int64",
            Self::Float => "float",
            Self::Double => "double",
            Self::String => "string",
            Self::Array => "array",
            Self::Slot => "value pointer",
            Self::NativeVariable => "native variable",
            Self::FlowOutput => "flow output",
            Self::ArrayElement => "array element",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A fixed-length, reference-counted array.
///
/// Elements may be replaced in place (assignment through an array element reference), but the
/// length never changes after construction.
#[derive(Debug)]
pub struct ArrayValue {
    array_type: u32,
    values: RefCell<Vec<Value>>,
}

impl ArrayValue {
    /// Creates an array of `len` undefined elements.
    #[must_use]
    pub fn new(array_type: u32, len: usize) -> Self {
        let mut values = Vec::with_capacity(len);
        values.resize_with(len, Value::default);
        Self::from_values(array_type, values)
    }

    /// Creates an array holding `values`.
    #[must_use]
    pub fn from_values(array_type: u32, values: Vec<Value>) -> Self {
        Self {
            array_type,
            values: RefCell::new(values),
        }
    }

    /// Template-defined array type tag.
    #[inline]
    #[must_use]
    pub fn array_type(&self) -> u32 {
        self.array_type
    }

    /// Number of elements.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.borrow().len()
    }

    /// Returns `true` if the array has no elements.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a clone of the element at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<Value> {
        self.values.borrow().get(index).cloned()
    }

    /// Replaces the element at `index`, returning the previous value.
    ///
    /// Returns `None` (and leaves the array untouched) if `index` is out of bounds.
    pub fn set(&self, index: usize, value: Value) -> Option<Value> {
        let mut values = self.values.borrow_mut();
        let slot = values.get_mut(index)?;
        Some(core::mem::replace(slot, value))
    }

    /// Returns a snapshot of all elements.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Value> {
        self.values.borrow().clone()
    }

    /// Returns a new, independently owned array with the same type and elements.
    #[must_use]
    pub fn deep_clone(&self) -> Self {
        Self::from_values(self.array_type, self.to_vec())
    }

    /// Sorts the elements in place with `compare`.
    pub fn sort_by<F>(&self, compare: F)
    where
        F: FnMut(&Value, &Value) -> Ordering,
    {
        self.values.borrow_mut().sort_by(compare);
    }
}

/// A value-slot pointer.
///
/// Local slots are relative to the flow instance that evaluated the expression; global slots
/// index the runtime's global variable table.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SlotRef {
    /// Slot in the evaluating instance's value array (inputs first, then locals).
    Local(u32),
    /// Declared global variable.
    Global(u32),
}

/// A view of one element of a shared array.
///
/// Holding this keeps the whole backing array alive.
#[derive(Clone, Debug)]
pub struct ArrayElementRef {
    array: Rc<ArrayValue>,
    index: usize,
}

impl ArrayElementRef {
    /// Creates a reference to element `index` of `array`.
    ///
    /// Returns `None` if `index` is out of bounds.
    #[must_use]
    pub fn new(array: Rc<ArrayValue>, index: usize) -> Option<Self> {
        (index < array.len()).then_some(Self { array, index })
    }

    /// The backing array.
    #[inline]
    #[must_use]
    pub fn array(&self) -> &Rc<ArrayValue> {
        &self.array
    }

    /// The element index.
    #[inline]
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Current value of the referenced element.
    #[must_use]
    pub fn get(&self) -> Value {
        self.array.get(self.index).unwrap_or_default()
    }
}

impl PartialEq for ArrayElementRef {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.array, &other.array) && self.index == other.index
    }
}

/// A runtime value.
#[derive(Clone, Debug, Default)]
pub enum Value {
    /// No value. Unset inputs hold this.
    #[default]
    Undefined,
    /// Explicit null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed 32-bit integer.
    Int32(i32),
    /// Signed 64-bit integer.
    Int64(i64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// Shared UTF-8 string.
    Str(Rc<str>),
    /// Shared fixed-length array.
    Array(Rc<ArrayValue>),
    /// Pointer to a variable slot (assignment target).
    Slot(SlotRef),
    /// Host-defined variable outside any flow.
    NativeVariable(u16),
    /// Output pin of the evaluating component.
    FlowOutput(u16),
    /// One element of a shared array.
    ArrayElement(ArrayElementRef),
}

impl Value {
    /// Creates a string value.
    #[must_use]
    pub fn string(text: &str) -> Self {
        Self::Str(Rc::from(text))
    }

    /// Creates an array value holding `values`.
    #[must_use]
    pub fn array(array_type: u32, values: Vec<Self>) -> Self {
        Self::Array(Rc::new(ArrayValue::from_values(array_type, values)))
    }

    /// Returns the value's kind.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Undefined => ValueKind::Undefined,
            Self::Null => ValueKind::Null,
            Self::Bool(_) => ValueKind::Boolean,
            Self::Int32(_) => ValueKind::Int32,
            Self::Int64(_) => ValueKind::Int64,
            Self::Float(_) => ValueKind::Float,
            Self::Double(_) => ValueKind::Double,
            Self::Str(_) => ValueKind::String,
            Self::Array(_) => ValueKind::Array,
            Self::Slot(_) => ValueKind::Slot,
            Self::NativeVariable(_) => ValueKind::NativeVariable,
            Self::FlowOutput(_) => ValueKind::FlowOutput,
            Self::ArrayElement(_) => ValueKind::ArrayElement,
        }
    }

    /// Returns `true` for [`Value::Undefined`].
    #[inline]
    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Returns `true` for [`Value::Undefined`] and [`Value::Null`].
    #[inline]
    #[must_use]
    pub fn is_undefined_or_null(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    /// Returns `true` for integer kinds.
    #[inline]
    #[must_use]
    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Int32(_) | Self::Int64(_))
    }

    /// Returns `true` for boolean and numeric kinds.
    #[inline]
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Bool(_) | Self::Int32(_) | Self::Int64(_) | Self::Float(_) | Self::Double(_)
        )
    }

    /// Returns `true` for the assignment-target kinds.
    #[inline]
    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            Self::Slot(_) | Self::NativeVariable(_) | Self::FlowOutput(_) | Self::ArrayElement(_)
        )
    }

    /// Borrows the string payload.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Borrows the array payload.
    #[inline]
    #[must_use]
    pub fn as_array(&self) -> Option<&Rc<ArrayValue>> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Truthiness.
    ///
    /// Empty strings, zero and NaN are false; arrays and references are true.
    #[must_use]
    pub fn to_bool(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int32(v) => *v != 0,
            Self::Int64(v) => *v != 0,
            Self::Float(v) => *v != 0.0 && !v.is_nan(),
            Self::Double(v) => *v != 0.0 && !v.is_nan(),
            Self::Str(s) => !s.is_empty(),
            Self::Array(_)
            | Self::Slot(_)
            | Self::NativeVariable(_)
            | Self::FlowOutput(_)
            | Self::ArrayElement(_) => true,
        }
    }

    /// Converts to `f64`.
    pub fn to_double(&self) -> Result<f64, ConversionError> {
        match self {
            Self::Bool(b) => Ok(f64::from(u8::from(*b))),
            Self::Int32(v) => Ok(f64::from(*v)),
            #[allow(
                clippy::cast_precision_loss,
                reason = "int64 to double follows the usual lossy numeric promotion"
            )]
            Self::Int64(v) => Ok(*v as f64),
            Self::Float(v) => Ok(f64::from(*v)),
            Self::Double(v) => Ok(*v),
            Self::Str(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| ConversionError::NotANumber),
            other => Err(ConversionError::WrongKind(other.kind())),
        }
    }

    /// Converts to `f32`.
    pub fn to_float(&self) -> Result<f32, ConversionError> {
        match self {
            Self::Float(v) => Ok(*v),
            #[allow(
                clippy::cast_possible_truncation,
                reason = "narrowing to float is the requested conversion"
            )]
            other => other.to_double().map(|v| v as f32),
        }
    }

    /// Converts to `i64`, truncating fractional parts.
    pub fn to_int64(&self) -> Result<i64, ConversionError> {
        match self {
            Self::Bool(b) => Ok(i64::from(*b)),
            Self::Int32(v) => Ok(i64::from(*v)),
            Self::Int64(v) => Ok(*v),
            Self::Str(s) => s
                .trim()
                .parse::<i64>()
                .or_else(|_| self.to_double().and_then(double_to_int64)),
            other => other.to_double().and_then(double_to_int64),
        }
    }

    /// Converts to `i32`, truncating fractional parts and wrapping wider integers.
    pub fn to_int32(&self) -> Result<i32, ConversionError> {
        match self {
            Self::Int32(v) => Ok(*v),
            #[allow(
                clippy::cast_possible_truncation,
                reason = "int32 conversion wraps wider integers like the firmware does"
            )]
            other => other.to_int64().map(|v| v as i32),
        }
    }

    /// Appends the textual form of this value to `out`.
    pub fn to_text(&self, out: &mut String) {
        let _ = write!(out, "{self}");
    }

    /// Whether this value is `array` or holds it at any depth.
    ///
    /// Storing such a value into an element of `array` would make the array contain itself.
    #[must_use]
    pub fn references_array(&self, array: &Rc<ArrayValue>) -> bool {
        match self {
            Self::Array(a) => {
                Rc::ptr_eq(a, array) || a.to_vec().iter().any(|v| v.references_array(array))
            }
            _ => false,
        }
    }

    /// Converts `source` so it can be stored into a slot currently holding `self`.
    ///
    /// Untyped slots (undefined or null) accept anything. Typed slots accept values of the same
    /// family: numbers convert between numeric kinds, strings and arrays must match exactly.
    pub fn coerce_for_assignment(&self, source: &Self) -> Result<Self, ConversionError> {
        if self.is_undefined_or_null() || source.is_undefined_or_null() {
            return Ok(source.clone());
        }
        let mismatch = || ConversionError::WrongKind(source.kind());
        match self {
            Self::Bool(_) if source.is_numeric() => Ok(Self::Bool(source.to_bool())),
            Self::Int32(_) if source.is_numeric() => source.to_int32().map(Self::Int32),
            Self::Int64(_) if source.is_numeric() => source.to_int64().map(Self::Int64),
            Self::Float(_) if source.is_numeric() => source.to_float().map(Self::Float),
            Self::Double(_) if source.is_numeric() => source.to_double().map(Self::Double),
            Self::Str(_) if matches!(source, Self::Str(_)) => Ok(source.clone()),
            Self::Array(_) if matches!(source, Self::Array(_)) => Ok(source.clone()),
            _ => Err(mismatch()),
        }
    }
}

fn double_to_int64(v: f64) -> Result<i64, ConversionError> {
    if v.is_nan() {
        return Err(ConversionError::NotANumber);
    }
    #[allow(
        clippy::cast_possible_truncation,
        reason = "saturating float to int conversion is intended"
    )]
    Ok(v as i64)
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int32(a), Self::Int32(b)) => a == b,
            (Self::Int64(a), Self::Int64(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => Rc::ptr_eq(a, b),
            (Self::Slot(a), Self::Slot(b)) => a == b,
            (Self::NativeVariable(a), Self::NativeVariable(b))
            | (Self::FlowOutput(a), Self::FlowOutput(b)) => a == b,
            (Self::ArrayElement(a), Self::ArrayElement(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::string(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => Ok(()),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Str(s) => f.write_str(s),
            Self::Array(a) => {
                f.write_str("[")?;
                for (i, v) in a.to_vec().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str("]")
            }
            Self::ArrayElement(e) => write!(f, "{}", e.get()),
            Self::Slot(_) | Self::NativeVariable(_) | Self::FlowOutput(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use alloc::rc::Weak;
    use alloc::string::ToString;
    use alloc::vec;

    #[test]
    fn array_freed_only_when_last_handle_drops() {
        let array = Rc::new(ArrayValue::from_values(0, vec![Value::Int32(1), Value::Int32(2)]));
        let weak: Weak<ArrayValue> = Rc::downgrade(&array);

        let a = Value::Array(array);
        let b = a.clone();
        let c = b.clone();
        drop(a);
        drop(b);
        assert!(weak.upgrade().is_some(), "one handle is still alive");
        drop(c);
        assert!(weak.upgrade().is_none(), "last handle released the array");
    }

    #[test]
    fn element_ref_keeps_whole_array_alive() {
        let array = Rc::new(ArrayValue::new(0, 3));
        let weak = Rc::downgrade(&array);
        let element = ArrayElementRef::new(array, 2).unwrap();
        assert_eq!(weak.strong_count(), 1);

        let value = Value::ArrayElement(element);
        assert!(weak.upgrade().is_some(), "element reference holds the array");
        drop(value);
        assert!(weak.upgrade().is_none(), "array released with its element ref");
    }

    #[test]
    fn element_ref_rejects_out_of_bounds_index() {
        let array = Rc::new(ArrayValue::new(0, 2));
        assert!(ArrayElementRef::new(array.clone(), 2).is_none());
        assert!(ArrayElementRef::new(array, 1).is_some());
    }

    #[test]
    fn string_refcount_tracks_clones() {
        let s = Value::string("hello");
        let Value::Str(rc) = &s else {
            panic!("expected string");
        };
        let rc = rc.clone();
        assert_eq!(Rc::strong_count(&rc), 2);
        let copy = s.clone();
        assert_eq!(Rc::strong_count(&rc), 3);
        drop(copy);
        drop(s);
        assert_eq!(Rc::strong_count(&rc), 1);
    }

    #[test]
    fn equality_is_structural_for_scalars_and_identity_for_arrays() {
        assert_eq!(Value::Int32(3), Value::Int32(3));
        assert_eq!(Value::string("a"), Value::string("a"));
        assert_ne!(Value::Int32(3), Value::Int64(3));
        assert_ne!(Value::Undefined, Value::Null);

        let a = Value::array(0, vec![Value::Int32(1)]);
        let b = Value::array(0, vec![Value::Int32(1)]);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn element_refs_compare_by_array_identity_and_index() {
        let array = Rc::new(ArrayValue::new(0, 2));
        let other = Rc::new(ArrayValue::new(0, 2));
        let e0 = ArrayElementRef::new(array.clone(), 0).unwrap();
        let e0_again = ArrayElementRef::new(array.clone(), 0).unwrap();
        let e1 = ArrayElementRef::new(array, 1).unwrap();
        let f0 = ArrayElementRef::new(other, 0).unwrap();
        assert_eq!(e0, e0_again);
        assert_ne!(e0, e1);
        assert_ne!(e0, f0);
    }

    #[test]
    fn numeric_string_conversion_reports_not_a_number() {
        assert_eq!(Value::string(" 2.5 ").to_double(), Ok(2.5));
        assert_eq!(Value::string("12").to_int32(), Ok(12));
        assert_eq!(
            Value::string("volts").to_double(),
            Err(ConversionError::NotANumber)
        );
        assert_eq!(
            Value::Undefined.to_double(),
            Err(ConversionError::WrongKind(ValueKind::Undefined))
        );
    }

    #[test]
    fn assignment_coerces_numbers_and_rejects_kind_mismatch() {
        let slot = Value::Int32(0);
        assert_eq!(
            slot.coerce_for_assignment(&Value::Double(5.7)),
            Ok(Value::Int32(5))
        );
        assert_eq!(
            slot.coerce_for_assignment(&Value::string("x")),
            Err(ConversionError::WrongKind(ValueKind::String))
        );
        assert_eq!(
            Value::Undefined.coerce_for_assignment(&Value::string("x")),
            Ok(Value::string("x"))
        );
    }

    #[test]
    fn text_form_matches_display() {
        let mut out = String::new();
        Value::Int32(1).to_text(&mut out);
        Value::string(" V").to_text(&mut out);
        assert_eq!(out, "1 V");
        assert_eq!(Value::Double(1.0).to_string(), "1");
        assert_eq!(Value::Undefined.to_string(), "");
        assert_eq!(
            Value::array(0, vec![Value::Int32(1), Value::Bool(true)]).to_string(),
            "[1, true]"
        );
    }

    #[test]
    fn array_set_keeps_length_fixed() {
        let array = ArrayValue::new(7, 2);
        assert_eq!(array.set(1, Value::Int32(9)), Some(Value::Undefined));
        assert_eq!(array.set(2, Value::Int32(9)), None);
        assert_eq!(array.len(), 2);
        assert_eq!(array.get(1), Some(Value::Int32(9)));
        assert_eq!(array.array_type(), 7);
    }

    #[test]
    fn references_array_follows_nesting_by_identity() {
        let inner = Rc::new(ArrayValue::from_values(0, vec![Value::Int32(1)]));
        let outer = Value::array(0, vec![Value::Null, Value::Array(Rc::clone(&inner))]);
        assert!(Value::Array(Rc::clone(&inner)).references_array(&inner));
        assert!(outer.references_array(&inner));

        let copy = Rc::new(inner.deep_clone());
        assert!(!outer.references_array(&copy));
        assert!(!Value::Int32(1).references_array(&inner));
    }
}
