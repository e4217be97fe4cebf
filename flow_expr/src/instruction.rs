// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Instruction word encoding.
//!
//! A compiled expression is a sequence of little-endian 16-bit words. The top three bits select
//! the [`Opcode`] class and the low thirteen bits carry its operand.

use core::fmt;

/// Bit position of the opcode class within an instruction word.
pub const OPCODE_SHIFT: u16 = 13;

/// Mask selecting the operand bits of an instruction word.
pub const OPERAND_MASK: u16 = 0x1FFF;

/// Largest encodable operand.
pub const MAX_OPERAND: u16 = OPERAND_MASK;

/// Instruction class.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Push a constant from the template's constants pool.
    PushConstant = 0,
    /// Push the value of an input slot of the current instance.
    PushInput = 1,
    /// Push a pointer to a local variable slot (offset by the input count).
    PushLocalVariable = 2,
    /// Push a pointer to a global variable, or a native variable id past the declared globals.
    PushGlobalVariable = 3,
    /// Push a flow-output id.
    PushOutput = 4,
    /// Pop an index and an array and push a reference to that element.
    ArrayElement = 5,
    /// Invoke an entry of the operation table.
    Operation = 6,
    /// Terminate the scan.
    End = 7,
}

impl Opcode {
    /// Decodes a 3-bit opcode class. Only the low three bits of `bits` are considered.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0x7 {
            0 => Self::PushConstant,
            1 => Self::PushInput,
            2 => Self::PushLocalVariable,
            3 => Self::PushGlobalVariable,
            4 => Self::PushOutput,
            5 => Self::ArrayElement,
            6 => Self::Operation,
            _ => Self::End,
        }
    }
}

/// Instruction encoding error.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InstructionError {
    /// The operand does not fit in 13 bits.
    OperandOutOfRange(u32),
}

impl fmt::Display for InstructionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OperandOutOfRange(operand) => {
                write!(f, "operand {operand} exceeds {MAX_OPERAND}")
            }
        }
    }
}

impl core::error::Error for InstructionError {}

/// A decoded instruction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    /// Instruction class.
    pub opcode: Opcode,
    /// 13-bit operand.
    pub operand: u16,
}

impl Instruction {
    /// Creates an instruction, checking that `operand` fits.
    pub fn new(opcode: Opcode, operand: u32) -> Result<Self, InstructionError> {
        match u16::try_from(operand) {
            Ok(operand) if operand <= MAX_OPERAND => Ok(Self { opcode, operand }),
            _ => Err(InstructionError::OperandOutOfRange(operand)),
        }
    }

    /// Decodes an instruction word.
    #[inline]
    #[must_use]
    pub const fn decode(word: u16) -> Self {
        #[allow(
            clippy::cast_possible_truncation,
            reason = "the shifted word has at most three significant bits"
        )]
        let bits = (word >> OPCODE_SHIFT) as u8;
        Self {
            opcode: Opcode::from_bits(bits),
            operand: word & OPERAND_MASK,
        }
    }

    /// Encodes the instruction word.
    #[inline]
    #[must_use]
    pub const fn encode(self) -> u16 {
        ((self.opcode as u16) << OPCODE_SHIFT) | (self.operand & OPERAND_MASK)
    }
}

/// Cursor over an instruction stream.
///
/// The reader never indexes past the end of its slice; a trailing odd byte or a missing
/// terminator is reported as `None` from [`InstructionReader::next_instruction`].
#[derive(Clone, Debug)]
pub struct InstructionReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> InstructionReader<'a> {
    /// Starts reading at the beginning of `bytes`.
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    /// Byte offset of the next instruction.
    #[inline]
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Reads the next instruction, or `None` if fewer than two bytes remain.
    pub fn next_instruction(&mut self) -> Option<Instruction> {
        let lo = *self.bytes.get(self.offset)?;
        let hi = *self.bytes.get(self.offset + 1)?;
        self.offset += 2;
        Some(Instruction::decode(u16::from_le_bytes([lo, hi])))
    }
}
