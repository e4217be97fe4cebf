// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Stack evaluator for compiled property expressions.
//!
//! The evaluator walks an instruction stream (see [`crate::instruction`]) until it meets an
//! `end` word, pushing operands and running operations from an [`Operations`] table. Everything
//! it needs from the surrounding flow instance comes through [`EvalContext`].
//!
//! Reference values (slots, native variables, array elements) are resolved to their current
//! value before an operation consumes them, and again on the final result for
//! [`Evaluator::evaluate`]. [`Evaluator::evaluate_assignable`] instead keeps the reference so the
//! caller can store through it.

use alloc::vec::Vec;
use core::fmt;

use crate::instruction::{InstructionReader, Opcode};
use crate::ops::{OperationEnv, Operations};
use crate::value::{ArrayElementRef, ConversionError, SlotRef, Value, ValueKind};

/// Default evaluator stack depth.
pub const DEFAULT_STACK_DEPTH: usize = 20;

/// Expression evaluation error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EvalError {
    /// A push would exceed the configured stack depth.
    StackOverflow,
    /// An instruction needed more operands than the stack holds.
    StackUnderflow,
    /// The scan ended with a stack depth other than one.
    UnbalancedStack(usize),
    /// The stream ended without an `end` word.
    Truncated,
    /// Constant index outside the template's pool.
    InvalidConstant(u16),
    /// Input index outside the instance's inputs.
    InvalidInput(u16),
    /// Slot reference outside the instance's or runtime's tables.
    InvalidSlot(SlotRef),
    /// Operation index outside the table.
    InvalidOperation(u16),
    /// Iterator index outside the current iterator context.
    InvalidIterator(i32),
    /// `array-element` applied to a non-array value.
    ArrayExpected(ValueKind),
    /// `array-element` index was not an integer.
    IntegerIndexExpected(ValueKind),
    /// `array-element` index out of range.
    IndexOutOfBounds {
        /// Requested index.
        index: i64,
        /// Array length.
        len: usize,
    },
    /// An operation received an operand of a kind it cannot handle.
    TypeMismatch {
        /// Operation name.
        op: &'static str,
        /// Offending operand kind.
        kind: ValueKind,
    },
    /// A numeric conversion failed.
    Conversion(ConversionError),
    /// Integer division or remainder by zero.
    DivisionByZero,
    /// The operation is not available in this build.
    Unsupported(&'static str),
    /// [`Evaluator::evaluate_assignable`] produced a plain value.
    NotAssignable(ValueKind),
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StackOverflow => write!(f, "Evaluation stack is full"),
            Self::StackUnderflow => write!(f, "Evaluation stack is empty"),
            Self::UnbalancedStack(depth) => {
                write!(f, "Expression left {depth} values on the stack")
            }
            Self::Truncated => write!(f, "Expression is missing its end instruction"),
            Self::InvalidConstant(i) => write!(f, "Invalid constant index {i}"),
            Self::InvalidInput(i) => write!(f, "Invalid input index {i}"),
            Self::InvalidSlot(slot) => write!(f, "Invalid variable slot {slot:?}"),
            Self::InvalidOperation(i) => write!(f, "Invalid operation index {i}"),
            Self::InvalidIterator(i) => write!(f, "Invalid iterator index {i}"),
            Self::ArrayExpected(_) => write!(f, "Array value expected"),
            Self::IntegerIndexExpected(_) => {
                write!(f, "Integer value expected for array element index")
            }
            Self::IndexOutOfBounds { .. } => write!(f, "Array element index out of bounds"),
            Self::TypeMismatch { op, kind } => write!(f, "Invalid {kind} operand for {op}"),
            Self::Conversion(err) => write!(f, "Conversion failed: {err}"),
            Self::DivisionByZero => write!(f, "Division by zero"),
            Self::Unsupported(op) => write!(f, "Operation {op} is not supported"),
            Self::NotAssignable(kind) => write!(f, "Can not assign to {kind}"),
        }
    }
}

impl core::error::Error for EvalError {}

impl From<ConversionError> for EvalError {
    fn from(err: ConversionError) -> Self {
        Self::Conversion(err)
    }
}

/// The flow instance and runtime data an expression may read.
pub trait EvalContext {
    /// Constant `index` of the template's pool.
    fn constant(&self, index: u16) -> Option<Value>;

    /// Current value of input slot `index` of the evaluating instance.
    fn input(&self, index: u16) -> Option<Value>;

    /// Number of input slots of the evaluating flow. Local variable slots follow them.
    fn input_count(&self) -> u32;

    /// Number of declared global variables.
    fn global_count(&self) -> u32;

    /// Current value behind a slot reference.
    fn slot(&self, slot: SlotRef) -> Option<Value>;

    /// Reads a host-defined native variable.
    fn native_variable(&mut self, id: u16) -> Value;

    /// Iterator values for `flow_it`.
    fn iterators(&self) -> &[i32] {
        &[]
    }
}

/// Evaluator limits.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EvalLimits {
    /// Maximum number of values on the stack.
    pub stack_depth: usize,
}

impl Default for EvalLimits {
    fn default() -> Self {
        Self {
            stack_depth: DEFAULT_STACK_DEPTH,
        }
    }
}

/// Result of a successful evaluation.
#[derive(Clone, Debug, PartialEq)]
pub struct Evaluated {
    /// The expression's value.
    pub value: Value,
    /// Bytes consumed, including the `end` word.
    pub consumed: usize,
}

/// Reusable expression evaluator.
///
/// Holds the operand stack between calls so repeated evaluations do not reallocate.
#[derive(Debug, Default)]
pub struct Evaluator {
    stack: Vec<Value>,
    limits: EvalLimits,
}

impl Evaluator {
    /// Creates an evaluator with the given limits.
    #[must_use]
    pub fn new(limits: EvalLimits) -> Self {
        Self {
            stack: Vec::with_capacity(limits.stack_depth),
            limits,
        }
    }

    /// Configured limits.
    #[inline]
    #[must_use]
    pub fn limits(&self) -> EvalLimits {
        self.limits
    }

    /// Evaluates `instructions` and resolves the result to a plain value.
    pub fn evaluate<C: EvalContext + ?Sized>(
        &mut self,
        ops: &Operations,
        ctx: &mut C,
        instructions: &[u8],
    ) -> Result<Evaluated, EvalError> {
        let (value, consumed) = self.run(ops, ctx, instructions)?;
        Ok(Evaluated {
            value: resolve(ctx, value)?,
            consumed,
        })
    }

    /// Evaluates `instructions` and requires the result to be an assignment target.
    pub fn evaluate_assignable<C: EvalContext + ?Sized>(
        &mut self,
        ops: &Operations,
        ctx: &mut C,
        instructions: &[u8],
    ) -> Result<Evaluated, EvalError> {
        let (value, consumed) = self.run(ops, ctx, instructions)?;
        if !value.is_reference() {
            return Err(EvalError::NotAssignable(value.kind()));
        }
        Ok(Evaluated { value, consumed })
    }

    fn run<C: EvalContext + ?Sized>(
        &mut self,
        ops: &Operations,
        ctx: &mut C,
        instructions: &[u8],
    ) -> Result<(Value, usize), EvalError> {
        self.stack.clear();
        let result = self.scan(ops, ctx, instructions);
        // Do not keep references alive past the evaluation.
        self.stack.clear();
        result
    }

    fn scan<C: EvalContext + ?Sized>(
        &mut self,
        ops: &Operations,
        ctx: &mut C,
        instructions: &[u8],
    ) -> Result<(Value, usize), EvalError> {
        let mut reader = InstructionReader::new(instructions);
        loop {
            let ins = reader.next_instruction().ok_or(EvalError::Truncated)?;
            let operand = ins.operand;
            match ins.opcode {
                Opcode::PushConstant => {
                    let v = ctx
                        .constant(operand)
                        .ok_or(EvalError::InvalidConstant(operand))?;
                    self.push(v)?;
                }
                Opcode::PushInput => {
                    let v = ctx.input(operand).ok_or(EvalError::InvalidInput(operand))?;
                    self.push(v)?;
                }
                Opcode::PushLocalVariable => {
                    let slot = ctx.input_count() + u32::from(operand);
                    self.push(Value::Slot(SlotRef::Local(slot)))?;
                }
                Opcode::PushGlobalVariable => {
                    let globals = ctx.global_count();
                    let index = u32::from(operand);
                    let v = if index < globals {
                        Value::Slot(SlotRef::Global(index))
                    } else {
                        let id = u16::try_from(index - globals + 1)
                            .map_err(|_| EvalError::InvalidSlot(SlotRef::Global(index)))?;
                        Value::NativeVariable(id)
                    };
                    self.push(v)?;
                }
                Opcode::PushOutput => self.push(Value::FlowOutput(operand))?,
                Opcode::ArrayElement => {
                    let index = self.pop()?;
                    let array = self.pop()?;
                    let index = resolve(ctx, index)?;
                    let array = resolve(ctx, array)?;
                    let element = array_element(array, &index)?;
                    self.push(element)?;
                }
                Opcode::Operation => {
                    let entry = ops
                        .get(operand)
                        .ok_or(EvalError::InvalidOperation(operand))?;
                    let arity = usize::from(entry.arity);
                    if self.stack.len() < arity {
                        return Err(EvalError::StackUnderflow);
                    }
                    let base = self.stack.len() - arity;
                    let mut args: Vec<Value> = self.stack.drain(base..).collect();
                    for arg in &mut args {
                        let raw = core::mem::take(arg);
                        *arg = resolve(ctx, raw)?;
                    }
                    let env = OperationEnv {
                        iterators: ctx.iterators(),
                    };
                    let result = (entry.func)(&args, &env)?;
                    self.push(result)?;
                }
                Opcode::End => break,
            }
        }
        if self.stack.len() != 1 {
            return Err(EvalError::UnbalancedStack(self.stack.len()));
        }
        let value = self.pop()?;
        Ok((value, reader.offset()))
    }

    fn push(&mut self, v: Value) -> Result<(), EvalError> {
        if self.stack.len() >= self.limits.stack_depth {
            return Err(EvalError::StackOverflow);
        }
        self.stack.push(v);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, EvalError> {
        self.stack.pop().ok_or(EvalError::StackUnderflow)
    }
}

/// Resolves a reference to the value it currently designates.
///
/// Plain values and flow-output ids are returned unchanged.
pub fn resolve<C: EvalContext + ?Sized>(ctx: &mut C, value: Value) -> Result<Value, EvalError> {
    match value {
        Value::Slot(slot) => ctx.slot(slot).ok_or(EvalError::InvalidSlot(slot)),
        Value::NativeVariable(id) => Ok(ctx.native_variable(id)),
        Value::ArrayElement(element) => Ok(element.get()),
        other => Ok(other),
    }
}

fn array_element(array: Value, index: &Value) -> Result<Value, EvalError> {
    let array = match array {
        Value::Undefined | Value::Null => return Ok(Value::Undefined),
        Value::Array(array) => array,
        other => return Err(EvalError::ArrayExpected(other.kind())),
    };
    let index = match index {
        Value::Int32(i) => i64::from(*i),
        Value::Int64(i) => *i,
        other => return Err(EvalError::IntegerIndexExpected(other.kind())),
    };
    let len = array.len();
    usize::try_from(index)
        .ok()
        .and_then(|i| ArrayElementRef::new(array, i))
        .map(Value::ArrayElement)
        .ok_or(EvalError::IndexOutOfBounds { index, len })
}
